//! Core type definitions for Hearth.
//!
//! This crate defines the identifier types shared by every layer of the
//! entity runtime:
//! - Entity identifiers (64-bit, time ordered)
//! - Key groups, the unit entities are hydrated and evicted by
//! - The snowflake generator that hands out entity identifiers
//!
//! Entity traits and cache policies live in `hearth-model`, not here.

mod ids;
mod snowflake;

pub use ids::{EntityId, KeyGroup};
pub use snowflake::{IdGenerator, MAX_NODE_ID, MAX_SEQUENCE};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid node id: {0}")]
    InvalidNodeId(u64),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] std::num::ParseIntError),
}
