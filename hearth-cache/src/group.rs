use crate::expiring::Evictable;
use hearth_model::AnyEntity;
use hearth_types::EntityId;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cache entry for one key group of one entity type.
///
/// Holds the entities loaded so far, whether the whole group has been
/// loaded, a full-group lock gating hydration, and try-once advisory locks
/// per entity id used by commits.
#[derive(Default)]
pub struct CachedGroup {
    hydrated: AtomicBool,
    full: Mutex<bool>,
    full_released: Condvar,
    entities: Mutex<BTreeMap<EntityId, Box<dyn AnyEntity>>>,
    entity_locks: Mutex<BTreeSet<EntityId>>,
}

impl CachedGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once every entity of the group has been loaded.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::Acquire)
    }

    pub fn mark_hydrated(&self) {
        self.hydrated.store(true, Ordering::Release);
    }

    // ── Full-group lock ──────────────────────────────────────────

    /// Takes the full-group lock, waiting at most `timeout`.
    pub fn lock_full(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut held = self.full.lock();
        while *held {
            if self.full_released.wait_until(&mut held, deadline).timed_out() && *held {
                return false;
            }
        }
        *held = true;
        true
    }

    pub fn unlock_full(&self) {
        *self.full.lock() = false;
        self.full_released.notify_one();
    }

    pub fn is_full_locked(&self) -> bool {
        *self.full.lock()
    }

    // ── Entity locks ─────────────────────────────────────────────

    /// Tries once to lock entity `id`.
    pub fn try_lock_entity(&self, id: EntityId) -> bool {
        self.entity_locks.lock().insert(id)
    }

    pub fn unlock_entity(&self, id: EntityId) {
        self.entity_locks.lock().remove(&id);
    }

    pub fn is_entity_locked(&self, id: EntityId) -> bool {
        self.entity_locks.lock().contains(&id)
    }

    // ── Contents ─────────────────────────────────────────────────

    /// Deep copy of one entity.
    pub fn get(&self, id: EntityId) -> Option<Box<dyn AnyEntity>> {
        self.entities.lock().get(&id).map(|e| e.clone_boxed())
    }

    /// Deep copies of every cached entity, ordered by id.
    pub fn snapshot(&self) -> Vec<Box<dyn AnyEntity>> {
        self.entities.lock().values().map(|e| e.clone_boxed()).collect()
    }

    pub fn version_of(&self, id: EntityId) -> Option<u32> {
        self.entities.lock().get(&id).map(|e| e.entity_meta().version)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.lock().contains_key(&id)
    }

    /// Stores a copy of `entity`, replacing any cached one. The stored copy
    /// carries no pending action.
    pub fn put(&self, entity: &dyn AnyEntity) {
        let mut copy = entity.clone_boxed();
        copy.entity_meta_mut().clear_action();
        self.entities.lock().insert(copy.entity_meta().id, copy);
    }

    /// Adds loaded entities; ids already cached keep their cached copy.
    pub fn fill(&self, loaded: Vec<Box<dyn AnyEntity>>) {
        let mut entities = self.entities.lock();
        for mut entity in loaded {
            entity.entity_meta_mut().clear_action();
            entities.entry(entity.entity_meta().id).or_insert(entity);
        }
    }

    pub fn remove(&self, id: EntityId) -> Option<Box<dyn AnyEntity>> {
        self.entities.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Evictable for CachedGroup {
    fn can_evict(&self) -> bool {
        !self.is_full_locked() && self.entity_locks.lock().is_empty()
    }
}

impl std::fmt::Debug for CachedGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedGroup")
            .field("hydrated", &self.is_hydrated())
            .field("entities", &self.len())
            .finish_non_exhaustive()
    }
}
