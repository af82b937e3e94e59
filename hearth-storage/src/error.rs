//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error from a relational shard (SQLite).
    #[error("relational store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the document store (DuckDB).
    #[error("document store error: {0}")]
    Document(#[from] duckdb::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sharding strategy produced a shard that does not exist, or the
    /// shard layout itself is invalid.
    #[error("sharding error: {0}")]
    Sharding(String),

    /// The entity type was never registered with this connector.
    #[error("unknown entity type: {0}")]
    UnknownType(String),

    /// Condition not supported by this connector.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// Type name cannot be used as a table name.
    #[error("invalid table name: {0}")]
    InvalidName(String),
}
