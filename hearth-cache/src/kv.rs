//! Key/value store contract backing the distributed tier.

use crate::error::CacheResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The subset of a Redis-like store the distributed tier needs.
///
/// Missing keys read as empty; expired keys behave as missing.
pub trait KeyValueStore: Send + Sync {
    /// Value of a plain string key.
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Every field of a hash.
    fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    /// Sets several hash fields, creating the hash if needed.
    fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()>;

    fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()>;

    /// Sets `key` to expire after `ttl`. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// `SET key value NX EX ttl`.
    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Sets every key with NX + expiry atomically: either all were absent and
    /// are now set, or nothing changed.
    fn set_nx_ex_all(&self, keys: &[String], value: &str, ttl: Duration) -> CacheResult<bool>;

    fn del(&self, keys: &[String]) -> CacheResult<()>;

    /// Deletes each string key whose value is still `value`, atomically per
    /// key. Returns how many were deleted.
    fn del_if_eq(&self, keys: &[String], value: &str) -> CacheResult<usize>;

    fn exists(&self, key: &str) -> CacheResult<bool>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`KeyValueStore`], for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
        slots.remove(key);
    }
    slots.get_mut(key)
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut slots = self.slots.lock();
        Ok(match live(&mut slots, key, Instant::now()) {
            Some(Slot { value: Value::Str(value), .. }) => Some(value.clone()),
            _ => None,
        })
    }

    fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut slots = self.slots.lock();
        Ok(match live(&mut slots, key, Instant::now()) {
            Some(Slot { value: Value::Hash(fields), .. }) => fields.clone(),
            _ => HashMap::new(),
        })
    }

    fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut slots = self.slots.lock();
        Ok(match live(&mut slots, key, Instant::now()) {
            Some(Slot { value: Value::Hash(fields), .. }) => fields.get(field).cloned(),
            _ => None,
        })
    }

    fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        if live(&mut slots, key, now).is_none_or(|slot| !matches!(slot.value, Value::Hash(_))) {
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        if let Some(Slot { value: Value::Hash(hash), .. }) = slots.get_mut(key) {
            hash.extend(fields.iter().cloned());
        }
        Ok(())
    }

    fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()> {
        let mut slots = self.slots.lock();
        if let Some(Slot { value: Value::Hash(hash), .. }) = live(&mut slots, key, Instant::now()) {
            for field in fields {
                hash.remove(field);
            }
        }
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        Ok(match live(&mut slots, key, now) {
            Some(slot) => {
                slot.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.set_nx_ex_all(&[key.to_string()], value, ttl)
    }

    fn set_nx_ex_all(&self, keys: &[String], value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        for key in keys {
            if live(&mut slots, key, now).is_some() {
                return Ok(false);
            }
        }
        for key in keys {
            slots.insert(
                key.clone(),
                Slot {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(now + ttl),
                },
            );
        }
        Ok(true)
    }

    fn del(&self, keys: &[String]) -> CacheResult<()> {
        let mut slots = self.slots.lock();
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }

    fn del_if_eq(&self, keys: &[String], value: &str) -> CacheResult<usize> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            let owned = matches!(
                live(&mut slots, key, now),
                Some(Slot { value: Value::Str(current), .. }) if current.as_str() == value
            );
            if owned {
                slots.remove(key);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut slots = self.slots.lock();
        Ok(live(&mut slots, key, Instant::now()).is_some())
    }
}
