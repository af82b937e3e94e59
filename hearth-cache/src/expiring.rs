use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Values an [`ExpiringMap`] may drop once they go idle.
pub trait Evictable {
    /// False while the value holds state that must not be lost (a held
    /// lock, for instance).
    fn can_evict(&self) -> bool {
        true
    }
}

struct Slot<V> {
    value: Arc<V>,
    last_access: Instant,
}

/// Outcome of [`ExpiringMap::evict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    Evicted,
    Absent,
    /// Referenced elsewhere, refused by the value, or pinned; left in place.
    InUse,
}

type Pin<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

/// Map whose entries expire after a period without access.
///
/// Entries still referenced outside the map, whose value refuses eviction,
/// or whose key is pinned survive a sweep regardless of age. Sweeps run on
/// demand ([`purge_expired`](Self::purge_expired)) and opportunistically from
/// [`get_or_insert_with`](Self::get_or_insert_with) once per idle period.
pub struct ExpiringMap<K, V> {
    idle: Duration,
    pinned: Option<Pin<K>>,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    last_sweep: Instant,
}

impl<K: Eq + Hash + Clone, V: Evictable> ExpiringMap<K, V> {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            pinned: None,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Keeps every key for which `pinned` returns true, however idle.
    #[must_use]
    pub fn pinned_by(mut self, pinned: impl Fn(&K) -> bool + Send + Sync + 'static) -> Self {
        self.pinned = Some(Box::new(pinned));
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle
    }

    /// Returns the entry and refreshes its access time.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(key)?;
        slot.last_access = Instant::now();
        Some(Arc::clone(&slot.value))
    }

    /// Returns the entry for `key`, creating it with `init` when absent.
    pub fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> Arc<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if now.duration_since(inner.last_sweep) >= self.idle {
            self.sweep(&mut inner, now);
        }
        let slot = inner.slots.entry(key).or_insert_with(|| Slot {
            value: Arc::new(init()),
            last_access: now,
        });
        slot.last_access = now;
        Arc::clone(&slot.value)
    }

    /// Drops the entry now, whatever its age, unless it is in use.
    pub fn evict(&self, key: &K) -> Eviction {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get(key) else {
            return Eviction::Absent;
        };
        if !self.is_evictable(key, slot) {
            return Eviction::InUse;
        }
        inner.slots.remove(key);
        Eviction::Evicted
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every idle, unreferenced, evictable entry. Returns how many
    /// were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        self.sweep(&mut inner, Instant::now())
    }

    fn is_evictable(&self, key: &K, slot: &Slot<V>) -> bool {
        Arc::strong_count(&slot.value) == 1
            && slot.value.can_evict()
            && !self.pinned.as_ref().is_some_and(|pinned| pinned(key))
    }

    fn sweep(&self, inner: &mut Inner<K, V>, now: Instant) -> usize {
        let before = inner.slots.len();
        inner.slots.retain(|key, slot| {
            let expired = now.duration_since(slot.last_access) >= self.idle;
            !(expired && self.is_evictable(key, slot))
        });
        inner.last_sweep = now;
        before - inner.slots.len()
    }
}
