//! Tier shared across processes through a [`KeyValueStore`].
//!
//! Layout per entity type `T` and key group `k`:
//!
//! | key                 | kind   | contents                                    |
//! |---------------------|--------|---------------------------------------------|
//! | `Data_T_k`          | hash   | entity id -> entity JSON, plus `""` once the group is fully loaded |
//! | `Lock_T_k`          | string | full-group lock, NX + expiry                |
//! | `Lock_T_k_id`       | string | entity lock, NX + expiry                    |

use crate::error::{CacheError, CacheResult};
use crate::expiring::Eviction;
use crate::kv::KeyValueStore;
use crate::tier::TierCache;
use hearth_model::{AnyEntity, CacheTier, EntityAction, EntityDescriptor};
use hearth_types::{EntityId, KeyGroup};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Field marking a fully loaded group.
const HYDRATED_FIELD: &str = "";

/// Lifetime of group and entity locks; a crashed holder releases on expiry.
pub const LOCK_TTL: Duration = Duration::from_secs(5);

const LOCK_POLL: Duration = Duration::from_millis(5);

fn data_key(type_name: &str, key: KeyGroup) -> String {
    format!("Data_{type_name}_{key}")
}

fn group_lock_key(type_name: &str, key: KeyGroup) -> String {
    format!("Lock_{type_name}_{key}")
}

fn entity_lock_key(type_name: &str, key: KeyGroup, id: EntityId) -> String {
    format!("Lock_{type_name}_{key}_{id}")
}

fn entity_lock_keys(entities: &[Box<dyn AnyEntity>]) -> Vec<String> {
    entities
        .iter()
        .map(|e| entity_lock_key(e.type_name(), e.entity_key_group(), e.id()))
        .collect()
}

/// Distributed tier over any [`KeyValueStore`].
pub struct DistributedCache {
    store: Arc<dyn KeyValueStore>,
    idle: Duration,
    lock_timeout: Duration,
    lock_token: String,
}

impl DistributedCache {
    /// Data hashes expire after `idle` without access; hydration waits at
    /// most `lock_timeout` for the group lock. `node_id` is written as the
    /// lock value so a stuck lock can be traced back to its holder.
    pub fn new(store: Arc<dyn KeyValueStore>, idle: Duration, lock_timeout: Duration, node_id: u64) -> Self {
        Self {
            store,
            idle,
            lock_timeout,
            lock_token: format!("node-{node_id}"),
        }
    }

    fn decode_group(
        &self,
        descriptor: &EntityDescriptor,
        fields: HashMap<String, String>,
    ) -> CacheResult<Vec<Box<dyn AnyEntity>>> {
        let mut entities = fields
            .into_iter()
            .filter(|(field, _)| field != HYDRATED_FIELD)
            .map(|(_, json)| descriptor.decode(&json).map_err(CacheError::from))
            .collect::<CacheResult<Vec<_>>>()?;
        entities.sort_by_key(|e| e.id());
        Ok(entities)
    }

    fn cached_version(&self, entity: &dyn AnyEntity) -> CacheResult<Option<u32>> {
        let data = data_key(entity.type_name(), entity.entity_key_group());
        match self.store.hget(&data, &entity.id().to_string())? {
            Some(json) => Ok(Some(entity.descriptor().decode(&json)?.entity_meta().version)),
            None => Ok(None),
        }
    }
}

impl TierCache for DistributedCache {
    fn tier(&self) -> CacheTier {
        CacheTier::Distributed
    }

    fn select_by_key(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
    ) -> CacheResult<Option<Vec<Box<dyn AnyEntity>>>> {
        let data = data_key(descriptor.type_name, key);
        let fields = self.store.hget_all(&data)?;
        if !fields.contains_key(HYDRATED_FIELD) {
            return Ok(None);
        }
        self.store.expire(&data, self.idle)?;
        self.decode_group(descriptor, fields).map(Some)
    }

    fn is_hydrated(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<bool> {
        Ok(self
            .store
            .hget(&data_key(descriptor.type_name, key), HYDRATED_FIELD)?
            .is_some())
    }

    fn lock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()> {
        let lock = group_lock_key(descriptor.type_name, key);
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            if self.store.set_nx_ex(&lock, &self.lock_token, LOCK_TTL)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout {
                    type_name: descriptor.type_name,
                    key,
                    timeout_ms: self.lock_timeout.as_millis() as u64,
                });
            }
            thread::sleep(LOCK_POLL);
        }
    }

    fn unlock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()> {
        let lock = group_lock_key(descriptor.type_name, key);
        if self.store.del_if_eq(&[lock], &self.lock_token)? == 0 {
            debug!(type_name = descriptor.type_name, %key, "group lock expired before release");
        }
        Ok(())
    }

    fn sync_in(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
        loaded: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<()> {
        let data = data_key(descriptor.type_name, key);
        let existing = self.store.hget_all(&data)?;
        let mut fields = Vec::with_capacity(loaded.len() + 1);
        for entity in &loaded {
            let field = entity.id().to_string();
            if !existing.contains_key(&field) {
                fields.push((field, entity.to_json()?));
            }
        }
        fields.push((HYDRATED_FIELD.to_string(), String::new()));
        self.store.hset(&data, &fields)?;
        self.store.expire(&data, self.idle)?;
        debug!(type_name = descriptor.type_name, %key, entities = loaded.len(), "hydrated distributed group");
        Ok(())
    }

    fn sync_out(
        &self,
        descriptor: &EntityDescriptor,
        rows: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<Vec<Box<dyn AnyEntity>>> {
        let mut groups: HashMap<KeyGroup, Option<HashMap<String, String>>> = HashMap::new();
        let mut reconciled = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.entity_key_group();
            if !groups.contains_key(&key) {
                let fields = self.store.hget_all(&data_key(descriptor.type_name, key))?;
                groups.insert(key, fields.contains_key(HYDRATED_FIELD).then_some(fields));
            }
            match groups.get(&key).and_then(Option::as_ref) {
                Some(fields) => {
                    if let Some(json) = fields.get(&row.id().to_string()) {
                        reconciled.push(descriptor.decode(json)?);
                    }
                }
                None => reconciled.push(row),
            }
        }
        Ok(reconciled)
    }

    fn lock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        let locked = self
            .store
            .set_nx_ex_all(&entity_lock_keys(entities), &self.lock_token, LOCK_TTL)?;
        if !locked {
            debug!(entities = entities.len(), "distributed entity locks busy");
        }
        Ok(locked)
    }

    fn unlock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<()> {
        let released = self.store.del_if_eq(&entity_lock_keys(entities), &self.lock_token)?;
        if released < entities.len() {
            debug!(entities = entities.len(), released, "entity locks expired before release");
        }
        Ok(())
    }

    fn check_version(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        for entity in entities {
            let cached = self.cached_version(&**entity)?;
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
                    "distributed version check failed"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn save(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool> {
        for entity in entities {
            let data = data_key(entity.type_name(), entity.entity_key_group());
            let field = entity.id().to_string();
            if entity.action() == Some(EntityAction::Delete) {
                self.store.hdel(&data, &[field])?;
            } else {
                self.store.hset(&data, &[(field, entity.to_json()?)])?;
            }
            self.store.expire(&data, self.idle)?;
        }
        Ok(true)
    }

    fn evict(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<Eviction> {
        let data = data_key(descriptor.type_name, key);
        if !self.store.exists(&data)? {
            return Ok(Eviction::Absent);
        }
        self.store.del(&[data])?;
        Ok(Eviction::Evicted)
    }
}
