//! Error types for the cache tiers.

use hearth_types::KeyGroup;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Infrastructure failures of a cache tier.
///
/// Contention (a busy entity lock, a stale version) is not an error; those
/// paths return `Ok(false)`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The full-group hydration lock could not be taken in time.
    #[error("timed out after {timeout_ms}ms waiting for the {type_name} group lock of key group {key}")]
    LockTimeout {
        type_name: &'static str,
        key: KeyGroup,
        timeout_ms: u64,
    },

    /// The entity type was never registered with this tier.
    #[error("entity type not registered with cache: {0}")]
    UnknownType(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by the key/value store backing the distributed tier.
    #[error("key/value store error: {0}")]
    Store(String),
}
