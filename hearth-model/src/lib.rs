//! Core entity model for Hearth.
//!
//! Defines the universal types every Hearth subsystem depends on:
//! - [`Entity`]: a typed, versioned record (implemented per entity type)
//! - [`EntityMeta`]: the id / version / pending-action header every entity carries
//! - [`AnyEntity`]: the type-erased view the caches and change sets work with
//! - [`EntityPolicy`]: which store, cache tier and cache scope a type uses
//! - [`EntityDescriptor`] / [`EntityRegistry`]: explicit type registration
//!
//! Entity types are normally produced by the schema-driven generator; the
//! runtime only relies on the traits declared here.

mod entity;
mod policy;
mod registry;

pub use entity::{AnyEntity, Entity, EntityAction, EntityMeta};
pub use policy::{CacheScope, CacheTier, EntityDescriptor, EntityPolicy, StoreKind};
pub use registry::EntityRegistry;
