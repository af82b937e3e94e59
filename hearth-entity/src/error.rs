//! Error types for the entity runtime.

use hearth_cache::CacheError;
use hearth_scheduler::SchedulerError;
use hearth_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for entity runtime operations.
pub type EntityResult<T> = Result<T, EntityError>;

/// Infrastructure failures of the entity runtime.
///
/// Commit conflicts are not errors: `save` reports them as `Ok(false)` and
/// transactions retry.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Types(#[from] hearth_types::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entity type was never registered.
    #[error("entity type not registered: {0}")]
    UnknownType(String),

    /// A cache or store returned an entity of another type.
    #[error("expected entity of type {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A type cached in the distributed tier was registered without one.
    #[error("entity type {0} needs a distributed cache tier, none is configured")]
    NoDistributedTier(&'static str),

    /// `run` was called from inside a running transaction.
    #[error("a transaction is already running on this thread")]
    NestedTransaction,

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
