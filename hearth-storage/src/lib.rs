//! Backing stores for Hearth.
//!
//! Every entity type lives in exactly one store, chosen by its
//! [`StoreKind`](hearth_model::StoreKind):
//!
//! - [`RelationalConnector`]: SQLite, one connection per shard, one table per
//!   type. Rows are routed to a shard by a [`ShardingStrategy`].
//! - [`DocumentConnector`]: DuckDB, one table ("collection") per type, one
//!   JSON document per row.
//!
//! Both implement [`Connector`] and exchange [`StoredRecord`]s, so the entity
//! runtime never touches SQL directly.

mod connector;
mod document;
mod error;
mod relational;

pub use connector::{Condition, Connector, DocumentFilter, StoredRecord};
pub use document::DocumentConnector;
pub use error::{StorageError, StorageResult};
pub use relational::{ModuloSharding, RelationalConnector, ShardingStrategy};

use tracing::warn;

/// Open a DuckDB connection with stale WAL recovery.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
pub fn open_duckdb_with_wal_recovery(path: &std::path::Path) -> StorageResult<duckdb::Connection> {
    match duckdb::Connection::open(path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    wal = %wal_path.display(),
                    error = %first_err,
                    "document store open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    return duckdb::Connection::open(path).map_err(Into::into);
                }
            }
            Err(first_err.into())
        }
    }
}

/// Table names come from entity type names; only plain identifiers are
/// allowed since they are spliced into SQL.
pub(crate) fn checked_table_name(type_name: &str) -> StorageResult<&str> {
    let mut chars = type_name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(type_name)
    } else {
        Err(StorageError::InvalidName(type_name.to_string()))
    }
}
