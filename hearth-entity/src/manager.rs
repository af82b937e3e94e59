//! Entity manager: read-through loading and optimistic commits.

use crate::error::{EntityError, EntityResult};
use crate::writer::{Connectors, WriteBehind};
use hearth_cache::{Eviction, LocalCache, MemoryCache, TierCache};
use hearth_model::{
    AnyEntity, CacheTier, Entity, EntityAction, EntityDescriptor, EntityRegistry, StoreKind,
};
use hearth_storage::Condition;
use hearth_types::{EntityId, IdGenerator, KeyGroup};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Releases a group lock on every exit path.
struct GroupLock<'a> {
    tier: &'a dyn TierCache,
    descriptor: &'a EntityDescriptor,
    key: KeyGroup,
}

impl<'a> GroupLock<'a> {
    fn acquire(tier: &'a dyn TierCache, descriptor: &'a EntityDescriptor, key: KeyGroup) -> EntityResult<Self> {
        tier.lock_group(descriptor, key)?;
        Ok(Self { tier, descriptor, key })
    }
}

impl Drop for GroupLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.tier.unlock_group(self.descriptor, self.key) {
            warn!(type_name = self.descriptor.type_name, key = %self.key, error = %e, "failed to release group lock");
        }
    }
}

/// Entity locks taken during one commit, released on drop.
#[derive(Default)]
struct CommitLocks<'a> {
    held: Vec<(&'a dyn TierCache, &'a [Box<dyn AnyEntity>])>,
}

impl<'a> CommitLocks<'a> {
    fn hold(&mut self, tier: &'a dyn TierCache, entities: &'a [Box<dyn AnyEntity>]) {
        self.held.push((tier, entities));
    }
}

impl Drop for CommitLocks<'_> {
    fn drop(&mut self) {
        for (tier, entities) in self.held.drain(..).rev() {
            if let Err(e) = tier.unlock_entities(entities) {
                warn!(tier = ?tier.tier(), entities = entities.len(), error = %e, "failed to release entity locks");
            }
        }
    }
}

fn commit_order(entity: &dyn AnyEntity) -> (&'static str, KeyGroup, EntityId) {
    (entity.type_name(), entity.entity_key_group(), entity.id())
}

fn downcast_all<T: Entity>(rows: Vec<Box<dyn AnyEntity>>) -> EntityResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            row.downcast::<T>().map_err(|other| EntityError::TypeMismatch {
                expected: T::TYPE_NAME,
                found: other.type_name(),
            })
        })
        .collect()
}

/// Front door to cached, versioned entities.
///
/// Reads go local cache, then the type's shared tier, then its store (the
/// whole key group is loaded at once). Commits lock the touched entities in
/// every tier, check versions, write through to the tiers and queue the
/// store writes on the [`WriteBehind`].
pub struct EntityManager {
    registry: EntityRegistry,
    ids: Arc<IdGenerator>,
    connectors: Connectors,
    memory: Arc<MemoryCache>,
    distributed: Option<Arc<dyn TierCache>>,
    writer: Arc<WriteBehind>,
}

impl EntityManager {
    pub fn new(
        ids: Arc<IdGenerator>,
        connectors: Connectors,
        memory: Arc<MemoryCache>,
        writer: Arc<WriteBehind>,
    ) -> Self {
        Self {
            registry: EntityRegistry::new(),
            ids,
            connectors,
            memory,
            distributed: None,
            writer,
        }
    }

    /// Adds the tier used by types with [`CacheTier::Distributed`].
    pub fn with_distributed(mut self, tier: Arc<dyn TierCache>) -> Self {
        self.distributed = Some(tier);
        self
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn connectors(&self) -> &Connectors {
        &self.connectors
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn writer(&self) -> &WriteBehind {
        &self.writer
    }

    /// Registers `T`: creates its table / collection and its cache pool.
    /// Registering a type twice is harmless.
    pub fn register<T: Entity>(&self) -> EntityResult<()> {
        let descriptor = EntityDescriptor::of::<T>();
        if descriptor.policy.tier == CacheTier::Distributed && self.distributed.is_none() {
            return Err(EntityError::NoDistributedTier(descriptor.type_name));
        }
        self.connectors.for_store(descriptor.policy.store).register(&descriptor)?;
        if descriptor.policy.tier == CacheTier::Memory {
            self.memory.register(&descriptor);
        }
        self.registry.register::<T>();
        Ok(())
    }

    /// Registered descriptor of a type.
    pub fn descriptor(&self, type_name: &str) -> EntityResult<EntityDescriptor> {
        self.registry
            .get(type_name)
            .ok_or_else(|| EntityError::UnknownType(type_name.to_string()))
    }

    fn tier_for(&self, descriptor: &EntityDescriptor) -> EntityResult<&dyn TierCache> {
        match descriptor.policy.tier {
            CacheTier::Memory => Ok(self.memory.as_ref()),
            CacheTier::Distributed => self
                .distributed
                .as_deref()
                .ok_or(EntityError::NoDistributedTier(descriptor.type_name)),
        }
    }

    /// Every entity of type `T` in key group `key`, as the transaction
    /// owning `local` sees it.
    pub fn select_by_key<T: Entity>(&self, local: &mut LocalCache, key: KeyGroup) -> EntityResult<Vec<T>> {
        let descriptor = self.descriptor(T::TYPE_NAME)?;
        if let Some(view) = local.snapshot(T::TYPE_NAME, key) {
            return downcast_all(view);
        }
        let tier = self.tier_for(&descriptor)?;
        let group = match tier.select_by_key(&descriptor, key)? {
            Some(cached) => cached,
            None => self.hydrate(tier, &descriptor, key)?,
        };
        local.put_snapshot(T::TYPE_NAME, key, group);
        downcast_all(local.snapshot(T::TYPE_NAME, key).unwrap_or_default())
    }

    /// Entities of type `T` matching a store-specific condition.
    ///
    /// Rows come from the store and are then reconciled: the shared tier's
    /// copy wins over the store's, and the transaction's own changes win
    /// over both.
    pub fn select_custom<T: Entity>(&self, local: &mut LocalCache, condition: &Condition) -> EntityResult<Vec<T>> {
        let descriptor = self.descriptor(T::TYPE_NAME)?;
        let tier = self.tier_for(&descriptor)?;
        let rows = self
            .connectors
            .for_store(descriptor.policy.store)
            .select_custom(T::TYPE_NAME, condition)?
            .iter()
            .map(|record| record.decode(&descriptor))
            .collect::<Result<Vec<_>, _>>()?;
        let reconciled = tier.sync_out(&descriptor, rows)?;
        downcast_all(local.overlay(reconciled))
    }

    /// Makes sure key group `key` of `T` is fully loaded in its tier.
    pub fn build_group<T: Entity>(&self, key: KeyGroup) -> EntityResult<()> {
        let descriptor = self.descriptor(T::TYPE_NAME)?;
        let tier = self.tier_for(&descriptor)?;
        if !tier.is_hydrated(&descriptor, key)? {
            self.hydrate(tier, &descriptor, key)?;
        }
        Ok(())
    }

    /// Loads a group from its store into `tier` under the group lock and
    /// returns the cached result.
    fn hydrate(
        &self,
        tier: &dyn TierCache,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
    ) -> EntityResult<Vec<Box<dyn AnyEntity>>> {
        let _lock = GroupLock::acquire(tier, descriptor, key)?;
        if let Some(cached) = tier.select_by_key(descriptor, key)? {
            return Ok(cached);
        }
        let loaded = self
            .connectors
            .for_store(descriptor.policy.store)
            .select_by_key(descriptor.type_name, key)?
            .iter()
            .map(|record| record.decode(descriptor))
            .collect::<Result<Vec<_>, _>>()?;
        tier.sync_in(descriptor, key, loaded)?;
        Ok(tier.select_by_key(descriptor, key)?.unwrap_or_default())
    }

    /// Commits a change set.
    ///
    /// Returns `Ok(false)` on contention (an entity lock is busy, a version
    /// is stale, an inserted id already exists, a group was evicted
    /// mid-commit); nothing is written in that case. An empty change set
    /// commits trivially.
    pub fn save(&self, changes: Vec<Box<dyn AnyEntity>>) -> EntityResult<bool> {
        let mut memory = Vec::new();
        let mut distributed = Vec::new();
        for mut entity in changes {
            let Some(action) = entity.action() else {
                debug!(type_name = entity.type_name(), id = %entity.id(), "skipping unchanged entity");
                continue;
            };
            if action == EntityAction::Insert && entity.id().is_unassigned() {
                entity.entity_meta_mut().id = self.ids.next_id();
            }
            match self.descriptor(entity.type_name())?.policy.tier {
                CacheTier::Memory => memory.push(entity),
                CacheTier::Distributed => distributed.push(entity),
            }
        }

        // Distributed first: its save can fail, a locked memory group's cannot.
        let mut batches: Vec<(&dyn TierCache, Vec<Box<dyn AnyEntity>>)> = Vec::with_capacity(2);
        if let Some(first) = distributed.first() {
            let tier = self
                .distributed
                .as_deref()
                .ok_or(EntityError::NoDistributedTier(first.type_name()))?;
            batches.push((tier, distributed));
        }
        if !memory.is_empty() {
            batches.push((self.memory.as_ref(), memory));
        }
        if batches.is_empty() {
            return Ok(true);
        }

        for (tier, batch) in &mut batches {
            batch.sort_by(|a, b| commit_order(&**a).cmp(&commit_order(&**b)));
            self.build_touched(*tier, batch)?;
        }

        let mut locks = CommitLocks::default();
        for (tier, batch) in &batches {
            if !tier.lock_entities(batch)? {
                return Ok(false);
            }
            locks.hold(*tier, batch);
        }
        for (tier, batch) in &batches {
            if !tier.check_version(batch)? {
                return Ok(false);
            }
        }

        let committed: Vec<(&dyn TierCache, Vec<Box<dyn AnyEntity>>)> = batches
            .iter()
            .map(|(tier, batch)| {
                let bumped = batch
                    .iter()
                    .map(|entity| {
                        let mut next = entity.clone();
                        next.entity_meta_mut().version += 1;
                        next
                    })
                    .collect();
                (*tier, bumped)
            })
            .collect();
        for (tier, batch) in &committed {
            if !tier.save(batch)? {
                return Ok(false);
            }
        }
        for (_, batch) in committed {
            for entity in batch {
                self.writer.submit(entity);
            }
        }
        Ok(true)
    }

    /// Hydrates every group the batch touches that is not loaded yet.
    fn build_touched(&self, tier: &dyn TierCache, batch: &[Box<dyn AnyEntity>]) -> EntityResult<()> {
        let touched: BTreeSet<(&'static str, KeyGroup)> = batch
            .iter()
            .map(|e| (e.type_name(), e.entity_key_group()))
            .collect();
        for (type_name, key) in touched {
            let descriptor = self.descriptor(type_name)?;
            if !tier.is_hydrated(&descriptor, key)? {
                self.hydrate(tier, &descriptor, key)?;
            }
        }
        Ok(())
    }

    /// Drops every partition-scoped group cached for partition `key`, in
    /// both tiers. Nothing is dropped while the partition is in use or has
    /// store writes pending.
    pub fn evict_partition(&self, key: KeyGroup) -> EntityResult<Eviction> {
        let mut eviction = self.memory.evict_partition(key);
        if eviction == Eviction::InUse {
            return Ok(eviction);
        }
        if let Some(distributed) = &self.distributed {
            if self.writer.pending_for(key) > 0 {
                return Ok(Eviction::InUse);
            }
            for descriptor in self.registry.partitioned() {
                if descriptor.policy.tier == CacheTier::Distributed
                    && distributed.evict(&descriptor, key)? == Eviction::Evicted
                {
                    eviction = Eviction::Evicted;
                }
            }
        }
        Ok(eviction)
    }

    /// Physical shards of a store, for scatter queries.
    pub fn shard_ids(&self, store: StoreKind) -> Vec<u32> {
        self.connectors.for_store(store).shard_ids()
    }
}
