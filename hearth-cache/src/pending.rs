use hearth_types::KeyGroup;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Committed changes queued for their store but not written yet, counted
/// per key group.
///
/// A key group with pending writes is newer in the cache than in its store,
/// so its cached groups must not be evicted until the count drops to zero.
#[derive(Debug, Default)]
pub struct PendingWrites {
    counts: Mutex<HashMap<KeyGroup, usize>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one write for `key` until the returned guard is dropped.
    pub fn track(self: &Arc<Self>, key: KeyGroup) -> PendingWrite {
        *self.counts.lock().entry(key).or_insert(0) += 1;
        PendingWrite {
            writes: Arc::clone(self),
            key,
        }
    }

    pub fn count(&self, key: KeyGroup) -> usize {
        self.counts.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn is_pending(&self, key: KeyGroup) -> bool {
        self.count(key) > 0
    }

    /// Pending writes over every key group.
    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    fn release(&self, key: KeyGroup) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&key);
            }
        }
    }
}

/// One tracked write; releases its count when dropped, whether the write
/// ran, failed or was discarded.
#[derive(Debug)]
pub struct PendingWrite {
    writes: Arc<PendingWrites>,
    key: KeyGroup,
}

impl PendingWrite {
    pub fn key(&self) -> KeyGroup {
        self.key
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        self.writes.release(self.key);
    }
}
