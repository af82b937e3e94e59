//! Cache tiers for Hearth.
//!
//! Reads flow from the transaction-local [`LocalCache`] to a shared tier
//! ([`MemoryCache`] or [`DistributedCache`]) and only then to a backing
//! store. The shared tiers implement [`TierCache`], the contract the entity
//! manager hydrates, locks, version-checks and commits through.
//!
//! Entities are grouped by [`KeyGroup`](hearth_types::KeyGroup): a group is
//! loaded, cached and evicted as a unit and tracked by a [`CachedGroup`] in
//! the memory tier, or by a `Data_*` hash in the distributed tier.

mod distributed;
mod error;
mod expiring;
mod group;
mod kv;
mod local;
mod memory;
mod pending;
mod tier;

pub use distributed::{DistributedCache, LOCK_TTL};
pub use error::{CacheError, CacheResult};
pub use expiring::{Evictable, Eviction, ExpiringMap};
pub use pending::{PendingWrite, PendingWrites};
pub use group::CachedGroup;
pub use kv::{KeyValueStore, MemoryKvStore};
pub use local::LocalCache;
pub use memory::MemoryCache;
pub use tier::TierCache;
