//! Document store on DuckDB.

use crate::connector::{unsupported, Condition, Connector, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::{checked_table_name, open_duckdb_with_wal_recovery};
use duckdb::{params, Connection};
use hearth_model::{EntityDescriptor, StoreKind};
use hearth_types::{EntityId, KeyGroup};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Document connector: a collection per entity type, each row one JSON
/// document keyed by entity id.
pub struct DocumentConnector {
    conn: Arc<Mutex<Connection>>,
    collections: RwLock<BTreeSet<String>>,
}

impl DocumentConnector {
    /// Opens (or creates) a document database at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_duckdb_with_wal_recovery(path)?;
        info!(path = %path.display(), "opened document store");
        Ok(Self::with_connection(conn))
    }

    /// Opens an in-memory document database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            collections: RwLock::new(BTreeSet::new()),
        }
    }

    fn collection<'a>(&self, type_name: &'a str) -> StorageResult<&'a str> {
        if !self.collections.read().unwrap().contains(type_name) {
            return Err(StorageError::UnknownType(type_name.to_string()));
        }
        Ok(type_name)
    }

    /// Number of documents in a collection.
    pub fn count(&self, type_name: &str) -> StorageResult<usize> {
        let collection = self.collection(type_name)?;
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {collection}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn record_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<StoredRecord> {
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

impl Connector for DocumentConnector {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    fn register(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        let collection = checked_table_name(descriptor.type_name)?;
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {collection} (
                id BIGINT PRIMARY KEY,
                key_group BIGINT NOT NULL,
                version BIGINT NOT NULL,
                doc VARCHAR NOT NULL
            );"
        ))?;
        self.collections.write().unwrap().insert(collection.to_string());
        debug!(collection, "registered document collection");
        Ok(())
    }

    fn insert(&self, type_name: &str, record: &StoredRecord) -> StorageResult<()> {
        let collection = self.collection(type_name)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO {collection} (id, key_group, version, doc) VALUES (?, ?, ?, ?)"),
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
        let collection = self.collection(type_name)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("UPDATE {collection} SET version = ?, doc = ? WHERE id = ?"),
            params![i64::from(record.version), record.data, record.id.as_raw() as i64],
        )?;
        if changed == 0 {
            warn!(collection, id = %record.id, key_group = %record.key_group, "replace matched no document");
        }
        Ok(())
    }

    fn delete(&self, type_name: &str, key_group: KeyGroup, id: EntityId) -> StorageResult<()> {
        let collection = self.collection(type_name)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("DELETE FROM {collection} WHERE id = ?"),
            params![id.as_raw() as i64],
        )?;
        if changed == 0 {
            warn!(collection, %id, %key_group, "delete matched no document");
        }
        Ok(())
    }

    fn select_by_key(&self, type_name: &str, key: KeyGroup) -> StorageResult<Vec<StoredRecord>> {
        let collection = self.collection(type_name)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, key_group, version, doc FROM {collection} WHERE key_group = ? ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![key.as_raw() as i64], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn select_custom(&self, type_name: &str, condition: &Condition) -> StorageResult<Vec<StoredRecord>> {
        let collection = self.collection(type_name)?;
        let Condition::Document(filter) = condition else {
            return Err(unsupported(self.kind(), condition));
        };

        let candidates = match filter.key_group() {
            Some(key) => self.select_by_key(collection, key)?,
            None => {
                let conn = self.conn.lock().unwrap();
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, key_group, version, doc FROM {collection} ORDER BY id"
                ))?;
                let rows = stmt.query_map([], record_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        let mut matched = Vec::new();
        for record in candidates {
            let doc: serde_json::Value = serde_json::from_str(&record.data)?;
            if filter.matches(&doc) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    fn shard_ids(&self) -> Vec<u32> {
        vec![0]
    }
}
