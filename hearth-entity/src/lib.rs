//! Entity runtime for Hearth.
//!
//! Ties the cache tiers, backing stores and schedulers into the API game
//! logic uses:
//! - [`EntityManager`]: read-through loading by key group, custom queries,
//!   optimistic commits
//! - [`Transaction`] / [`TransactionRunner`]: retry-on-conflict units of work
//! - [`WriteBehind`]: per-key-group ordered persistence of committed changes
//! - [`Hearth`]: the container owning all of the above, built from a
//!   [`HearthConfig`]
//!
//! A commit is visible in the cache tiers as soon as `save` returns true; it
//! reaches the backing store asynchronously.

mod config;
mod error;
mod manager;
mod runtime;
pub mod transaction;
mod writer;

pub use config::{CacheConfig, DocumentConfig, HearthConfig, RelationalConfig, SchedulerSection, TransactionConfig};
pub use error::{EntityError, EntityResult};
pub use manager::EntityManager;
pub use runtime::Hearth;
pub use transaction::{FnTransaction, Transaction, TransactionRunner, TxOutcome, TxScope};
pub use writer::{Connectors, WriteBehind, WriteTask};
