//! Sharded relational store on SQLite.

use crate::connector::{unsupported, Condition, Connector, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::checked_table_name;
use hearth_model::{EntityDescriptor, StoreKind};
use hearth_types::{EntityId, KeyGroup};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Picks the shard a key group is stored on.
pub trait ShardingStrategy: Send + Sync + fmt::Debug {
    /// Returns a shard index; anything `>= shard_count` is rejected by the
    /// connector.
    fn shard_for(&self, key: KeyGroup, shard_count: u32) -> u32;
}

/// `key % shard_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloSharding;

impl ShardingStrategy for ModuloSharding {
    fn shard_for(&self, key: KeyGroup, shard_count: u32) -> u32 {
        if shard_count == 0 {
            return 0;
        }
        (key.as_raw() % u64::from(shard_count)) as u32
    }
}

/// Relational connector: one SQLite connection per shard, one table per
/// entity type with columns `id, key_group, version, data`.
pub struct RelationalConnector {
    shards: Vec<Mutex<Connection>>,
    strategy: Box<dyn ShardingStrategy>,
    tables: RwLock<BTreeSet<String>>,
}

impl RelationalConnector {
    /// Opens (or creates) `shard_count` shard files `shard_{n}.db` under `dir`.
    pub fn open(dir: &Path, shard_count: u32) -> StorageResult<Self> {
        check_shard_count(shard_count)?;
        std::fs::create_dir_all(dir)?;
        let shards = (0..shard_count)
            .map(|n| Connection::open(dir.join(format!("shard_{n}.db"))).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        info!(dir = %dir.display(), shard_count, "opened relational store");
        Ok(Self::from_shards(shards))
    }

    /// Opens `shard_count` in-memory shards (for testing).
    pub fn open_in_memory(shard_count: u32) -> StorageResult<Self> {
        check_shard_count(shard_count)?;
        let shards = (0..shard_count)
            .map(|_| Connection::open_in_memory().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_shards(shards))
    }

    fn from_shards(shards: Vec<Mutex<Connection>>) -> Self {
        Self {
            shards,
            strategy: Box::new(ModuloSharding),
            tables: RwLock::new(BTreeSet::new()),
        }
    }

    /// Replaces the default [`ModuloSharding`].
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ShardingStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Shard holding `key`, validated against the shard layout.
    pub fn shard_for(&self, key: KeyGroup) -> StorageResult<u32> {
        let shard = self.strategy.shard_for(key, self.shard_count());
        if shard >= self.shard_count() {
            return Err(StorageError::Sharding(format!(
                "{:?} routed key group {key} to shard {shard}, only {} exist",
                self.strategy,
                self.shard_count()
            )));
        }
        Ok(shard)
    }

    fn shard(&self, shard: u32) -> StorageResult<&Mutex<Connection>> {
        self.shards
            .get(shard as usize)
            .ok_or_else(|| StorageError::Sharding(format!("no shard {shard}")))
    }

    fn table<'a>(&self, type_name: &'a str) -> StorageResult<&'a str> {
        if !self.tables.read().unwrap().contains(type_name) {
            return Err(StorageError::UnknownType(type_name.to_string()));
        }
        Ok(type_name)
    }
}

fn check_shard_count(shard_count: u32) -> StorageResult<()> {
    if shard_count == 0 {
        return Err(StorageError::Sharding("shard count must be at least 1".into()));
    }
    Ok(())
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    let id: i64 = row.get(0)?;
    let key_group: i64 = row.get(1)?;
    let version: i64 = row.get(2)?;
    Ok(StoredRecord {
        id: EntityId::from_raw(id as u64),
        key_group: KeyGroup::new(key_group as u64),
        version: version as u32,
        data: row.get(3)?,
    })
}

fn read_records(conn: &Connection, sql: &str, key: Option<KeyGroup>) -> StorageResult<Vec<StoredRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = match key {
        Some(key) => stmt.query_map(params![key.as_raw() as i64], record_from_row)?,
        None => stmt.query_map([], record_from_row)?,
    };
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

impl Connector for RelationalConnector {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn register(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        let table = checked_table_name(descriptor.type_name)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                key_group INTEGER NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_key_group ON {table}(key_group);"
        );
        for shard in &self.shards {
            shard.lock().unwrap().execute_batch(&ddl)?;
        }
        self.tables.write().unwrap().insert(table.to_string());
        debug!(table, shards = self.shards.len(), "registered relational table");
        Ok(())
    }

    fn insert(&self, type_name: &str, record: &StoredRecord) -> StorageResult<()> {
        let table = self.table(type_name)?;
        let conn = self.shard(self.shard_for(record.key_group)?)?.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO {table} (id, key_group, version, data) VALUES (?1, ?2, ?3, ?4)"),
            params![
                record.id.as_raw() as i64,
                record.key_group.as_raw() as i64,
                i64::from(record.version),
                record.data,
            ],
        )?;
        Ok(())
    }

    fn update(&self, type_name: &str, record: &StoredRecord) -> StorageResult<()> {
        let table = self.table(type_name)?;
        let conn = self.shard(self.shard_for(record.key_group)?)?.lock().unwrap();
        let changed = conn.execute(
            &format!("UPDATE {table} SET version = ?1, data = ?2 WHERE id = ?3"),
            params![i64::from(record.version), record.data, record.id.as_raw() as i64],
        )?;
        if changed == 0 {
            warn!(table, id = %record.id, key_group = %record.key_group, "update touched no rows");
        }
        Ok(())
    }

    fn delete(&self, type_name: &str, key_group: KeyGroup, id: EntityId) -> StorageResult<()> {
        let table = self.table(type_name)?;
        let conn = self.shard(self.shard_for(key_group)?)?.lock().unwrap();
        let changed = conn.execute(
            &format!("DELETE FROM {table} WHERE id = ?1"),
            params![id.as_raw() as i64],
        )?;
        if changed == 0 {
            warn!(table, %id, %key_group, "delete touched no rows");
        }
        Ok(())
    }

    fn select_by_key(&self, type_name: &str, key: KeyGroup) -> StorageResult<Vec<StoredRecord>> {
        let table = self.table(type_name)?;
        let conn = self.shard(self.shard_for(key)?)?.lock().unwrap();
        read_records(
            &conn,
            &format!("SELECT id, key_group, version, data FROM {table} WHERE key_group = ?1 ORDER BY id"),
            Some(key),
        )
    }

    fn select_custom(&self, type_name: &str, condition: &Condition) -> StorageResult<Vec<StoredRecord>> {
        let table = self.table(type_name)?;
        let Condition::Where { shard, clause } = condition else {
            return Err(unsupported(self.kind(), condition));
        };
        let conn = self.shard(*shard)?.lock().unwrap();
        read_records(
            &conn,
            &format!("SELECT id, key_group, version, data FROM {table} WHERE {clause} ORDER BY id"),
            None,
        )
    }

    fn shard_ids(&self) -> Vec<u32> {
        (0..self.shard_count()).collect()
    }
}

impl fmt::Debug for RelationalConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalConnector")
            .field("shards", &self.shards.len())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
