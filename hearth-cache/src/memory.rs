//! Process-local shared tier.

use crate::error::{CacheError, CacheResult};
use crate::expiring::{Evictable, Eviction, ExpiringMap};
use crate::group::CachedGroup;
use crate::pending::PendingWrites;
use crate::tier::TierCache;
use hearth_model::{AnyEntity, CacheScope, CacheTier, EntityAction, EntityDescriptor};
use hearth_types::{EntityId, KeyGroup};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Every partition-scoped group cached for one partition id.
#[derive(Default)]
struct PartitionBucket {
    groups: Mutex<HashMap<&'static str, Arc<CachedGroup>>>,
}

impl PartitionBucket {
    fn group(&self, type_name: &'static str) -> Arc<CachedGroup> {
        Arc::clone(self.groups.lock().entry(type_name).or_default())
    }

    fn existing(&self, type_name: &str) -> Option<Arc<CachedGroup>> {
        self.groups.lock().get(type_name).cloned()
    }

    fn evict(&self, type_name: &str) -> Eviction {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get(type_name) else {
            return Eviction::Absent;
        };
        if Arc::strong_count(group) > 1 || !group.can_evict() {
            return Eviction::InUse;
        }
        groups.remove(type_name);
        Eviction::Evicted
    }
}

impl Evictable for PartitionBucket {
    fn can_evict(&self) -> bool {
        self.groups
            .lock()
            .values()
            .all(|g| Arc::strong_count(g) == 1 && g.can_evict())
    }
}

/// In-process tier shared by every worker thread.
///
/// Partition-scoped types live in one bucket per partition id that expires
/// as a whole; group-scoped types get one expiring pool each, created at
/// [`register`](Self::register).
///
/// Nothing is evicted while it is locked, referenced by a reader, or
/// belongs to a key group with [`PendingWrites`]: the store would still
/// hold an older state of it.
pub struct MemoryCache {
    partitions: ExpiringMap<KeyGroup, PartitionBucket>,
    pools: RwLock<HashMap<&'static str, ExpiringMap<KeyGroup, CachedGroup>>>,
    pending: Arc<PendingWrites>,
    idle: Duration,
    lock_timeout: Duration,
}

impl MemoryCache {
    /// Entries expire after `idle` without access; hydration waits at most
    /// `lock_timeout` for the group lock.
    pub fn new(idle: Duration, lock_timeout: Duration) -> Self {
        let pending = Arc::new(PendingWrites::new());
        Self {
            partitions: pinned_map(idle, &pending),
            pools: RwLock::new(HashMap::new()),
            pending,
            idle,
            lock_timeout,
        }
    }

    /// Write-behind counter consulted before every eviction.
    pub fn pending_writes(&self) -> &Arc<PendingWrites> {
        &self.pending
    }

    /// Creates the pool of a group-scoped type. Partition-scoped types need
    /// no setup.
    pub fn register(&self, descriptor: &EntityDescriptor) {
        if descriptor.policy.scope == CacheScope::Group {
            self.pools
                .write()
                .entry(descriptor.type_name)
                .or_insert_with(|| pinned_map(self.idle, &self.pending));
        }
    }

    /// Drops the whole bucket of a partition, unless any group in it is in
    /// use or has writes pending.
    pub fn evict_partition(&self, key: KeyGroup) -> Eviction {
        let eviction = self.partitions.evict(&key);
        match eviction {
            Eviction::Evicted => debug!(%key, "evicted partition"),
            Eviction::InUse => debug!(%key, pending = self.pending.count(key), "partition in use, kept"),
            Eviction::Absent => {}
        }
        eviction
    }

    /// Sweeps idle entries from every pool. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let pooled: usize = self.pools.read().values().map(ExpiringMap::purge_expired).sum();
        pooled + self.partitions.purge_expired()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Group entry, created empty when absent.
    fn group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<Arc<CachedGroup>> {
        match descriptor.policy.scope {
            CacheScope::Partition => Ok(self
                .partitions
                .get_or_insert_with(key, PartitionBucket::default)
                .group(descriptor.type_name)),
            CacheScope::Group => {
                let pools = self.pools.read();
                let pool = pools
                    .get(descriptor.type_name)
                    .ok_or_else(|| CacheError::UnknownType(descriptor.type_name.to_string()))?;
                Ok(pool.get_or_insert_with(key, CachedGroup::new))
            }
        }
    }

    /// Group entry if still cached.
    fn existing_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<Option<Arc<CachedGroup>>> {
        match descriptor.policy.scope {
            CacheScope::Partition => Ok(self
                .partitions
                .get(&key)
                .and_then(|bucket| bucket.existing(descriptor.type_name))),
            CacheScope::Group => {
                let pools = self.pools.read();
                let pool = pools
                    .get(descriptor.type_name)
                    .ok_or_else(|| CacheError::UnknownType(descriptor.type_name.to_string()))?;
                Ok(pool.get(&key))
            }
        }
    }

    fn group_of(&self, entity: &dyn AnyEntity) -> CacheResult<Option<Arc<CachedGroup>>> {
        self.existing_group(&entity.descriptor(), entity.entity_key_group())
    }
}

impl TierCache for MemoryCache {
    fn tier(&self) -> CacheTier {
        CacheTier::Memory
    }

    fn select_by_key(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
    ) -> CacheResult<Option<Vec<Box<dyn AnyEntity>>>> {
        Ok(self
            .existing_group(descriptor, key)?
            .filter(|group| group.is_hydrated())
            .map(|group| group.snapshot()))
    }

    fn is_hydrated(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<bool> {
        Ok(self
            .existing_group(descriptor, key)?
            .is_some_and(|group| group.is_hydrated()))
    }

    fn lock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()> {
        let group = self.group(descriptor, key)?;
        if group.lock_full(self.lock_timeout) {
            Ok(())
        } else {
            Err(CacheError::LockTimeout {
                type_name: descriptor.type_name,
                key,
                timeout_ms: self.lock_timeout.as_millis() as u64,
            })
        }
    }

    fn unlock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()> {
        if let Some(group) = self.existing_group(descriptor, key)? {
            group.unlock_full();
        }
        Ok(())
    }

    fn sync_in(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
        loaded: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<()> {
        let group = self.group(descriptor, key)?;
        group.fill(loaded);
        group.mark_hydrated();
        debug!(type_name = descriptor.type_name, %key, entities = group.len(), "hydrated group");
        Ok(())
    }

    fn sync_out(
        &self,
        descriptor: &EntityDescriptor,
        rows: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<Vec<Box<dyn AnyEntity>>> {
        let mut groups: HashMap<KeyGroup, Option<Arc<CachedGroup>>> = HashMap::new();
        let mut reconciled = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.entity_key_group();
            let group = match groups.get(&key) {
                Some(group) => group.clone(),
                None => {
                    let group = self
                        .existing_group(descriptor, key)?
                        .filter(|group| group.is_hydrated());
                    groups.insert(key, group.clone());
                    group
                }
            };
            match group {
                Some(group) => reconciled.extend(group.get(row.id())),
                None => reconciled.push(row),
            }
        }
        Ok(reconciled)
    }

    fn lock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        let mut acquired: Vec<(Arc<CachedGroup>, EntityId)> = Vec::with_capacity(entities.len());
        for entity in entities {
            let locked = match self.group_of(&**entity)? {
                Some(group) if group.try_lock_entity(entity.id()) => {
                    acquired.push((group, entity.id()));
                    true
                }
                Some(_) => {
                    debug!(type_name = entity.type_name(), id = %entity.id(), "entity lock busy");
                    false
                }
                None => {
                    debug!(
                        type_name = entity.type_name(),
                        key = %entity.entity_key_group(),
                        "group no longer cached"
                    );
                    false
                }
            };
            if !locked {
                for (group, id) in acquired {
                    group.unlock_entity(id);
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn unlock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<()> {
        for entity in entities {
            if let Some(group) = self.group_of(&**entity)? {
                group.unlock_entity(entity.id());
            }
        }
        Ok(())
    }

    fn check_version(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        for entity in entities {
            let cached = self
                .group_of(&**entity)?
                .and_then(|group| group.version_of(entity.id()));
            let ok = match (entity.action(), cached) {
                (Some(EntityAction::Insert), cached) => cached.is_none(),
                (Some(EntityAction::Delete), _) => true,
                (_, Some(version)) => version == entity.entity_meta().version,
                (_, None) => false,
            };
            if !ok {
                debug!(
                    type_name = entity.type_name(),
                    id = %entity.id(),
                    action = ?entity.action(),
                    expected = entity.entity_meta().version,
                    cached = ?cached,
                    "version check failed"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn save(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        for entity in entities {
            let Some(group) = self.group_of(&**entity)? else {
                debug!(type_name = entity.type_name(), id = %entity.id(), "group evicted before save");
                return Ok(false);
            };
            if entity.action() == Some(EntityAction::Delete) {
                group.remove(entity.id());
            } else {
                group.put(&**entity);
            }
        }
        Ok(true)
    }

    fn evict(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<Eviction> {
        if self.pending.is_pending(key) {
            return Ok(Eviction::InUse);
        }
        Ok(match descriptor.policy.scope {
            CacheScope::Partition => self
                .partitions
                .get(&key)
                .map_or(Eviction::Absent, |bucket| bucket.evict(descriptor.type_name)),
            CacheScope::Group => self
                .pools
                .read()
                .get(descriptor.type_name)
                .map_or(Eviction::Absent, |pool| pool.evict(&key)),
        })
    }
}

fn pinned_map<V: Evictable>(idle: Duration, pending: &Arc<PendingWrites>) -> ExpiringMap<KeyGroup, V> {
    let pending = Arc::clone(pending);
    ExpiringMap::new(idle).pinned_by(move |key| pending.is_pending(*key))
}
