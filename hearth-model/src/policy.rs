use crate::entity::{AnyEntity, Entity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backing store an entity type is persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Sharded relational store, one table per type.
    Relational,
    /// Document store, one collection per type.
    Document,
}

/// Shared cache tier holding the authoritative copy of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Process-local, shared by every worker thread.
    Memory,
    /// External key/value store shared across processes.
    Distributed,
}

/// How a type's cache entries are bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One cache per type, indexed by key group.
    Group,
    /// One bucket per partition id (e.g. an account) holding every
    /// partition-scoped type for it; the bucket expires as a unit.
    Partition,
}

/// Static storage and caching policy of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityPolicy {
    pub store: StoreKind,
    pub tier: CacheTier,
    pub scope: CacheScope,
}

impl EntityPolicy {
    #[must_use]
    pub const fn new(store: StoreKind, tier: CacheTier, scope: CacheScope) -> Self {
        Self { store, tier, scope }
    }

    /// Relational store, memory tier, per-type group cache.
    #[must_use]
    pub const fn relational() -> Self {
        Self::new(StoreKind::Relational, CacheTier::Memory, CacheScope::Group)
    }

    /// Document store, memory tier, per-type group cache.
    #[must_use]
    pub const fn document() -> Self {
        Self::new(StoreKind::Document, CacheTier::Memory, CacheScope::Group)
    }

    /// Same store and scope, cached in the distributed tier instead.
    #[must_use]
    pub const fn distributed(self) -> Self {
        Self::new(self.store, CacheTier::Distributed, self.scope)
    }

    /// Same store and tier, cached per partition instead of per type.
    #[must_use]
    pub const fn partitioned(self) -> Self {
        Self::new(self.store, self.tier, CacheScope::Partition)
    }
}

/// Decodes a serialized entity into its concrete type, boxed.
pub type DecodeFn = fn(&str) -> serde_json::Result<Box<dyn AnyEntity>>;

/// Everything the runtime needs to handle a type without knowing it
/// statically: name, policy and a decoder.
#[derive(Clone, Copy)]
pub struct EntityDescriptor {
    pub type_name: &'static str,
    pub policy: EntityPolicy,
    decode: DecodeFn,
}

impl EntityDescriptor {
    /// Descriptor for the entity type `T`.
    #[must_use]
    pub fn of<T: Entity>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            policy: T::POLICY,
            decode: decode_as::<T>,
        }
    }

    /// Decodes JSON produced by [`AnyEntity::to_json`].
    pub fn decode(&self, json: &str) -> serde_json::Result<Box<dyn AnyEntity>> {
        (self.decode)(json)
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn decode_as<T: Entity>(json: &str) -> serde_json::Result<Box<dyn AnyEntity>> {
    let entity: T = serde_json::from_str(json)?;
    Ok(Box::new(entity))
}
