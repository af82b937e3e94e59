use crate::entity::Entity;
use crate::policy::{CacheScope, EntityDescriptor, StoreKind};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

/// Startup registration table of entity types.
///
/// Stores and caches are provisioned from this table instead of scanning
/// for types at runtime.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    types: RwLock<BTreeMap<&'static str, EntityDescriptor>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`. Returns false if a type with the same name was
    /// already registered (the first registration is kept).
    pub fn register<T: Entity>(&self) -> bool {
        self.register_descriptor(EntityDescriptor::of::<T>())
    }

    /// Registers a descriptor directly.
    pub fn register_descriptor(&self, descriptor: EntityDescriptor) -> bool {
        let mut types = self.types.write().unwrap();
        if types.contains_key(descriptor.type_name) {
            return false;
        }
        debug!(type_name = descriptor.type_name, policy = ?descriptor.policy, "registered entity type");
        types.insert(descriptor.type_name, descriptor);
        true
    }

    /// Looks up a registered type by name.
    pub fn get(&self, type_name: &str) -> Option<EntityDescriptor> {
        self.types.read().unwrap().get(type_name).copied()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.read().unwrap().contains_key(type_name)
    }

    /// All registered descriptors, ordered by type name.
    pub fn descriptors(&self) -> Vec<EntityDescriptor> {
        self.types.read().unwrap().values().copied().collect()
    }

    /// Registered types persisted in `store`.
    pub fn by_store(&self, store: StoreKind) -> Vec<EntityDescriptor> {
        self.types
            .read()
            .unwrap()
            .values()
            .filter(|d| d.policy.store == store)
            .copied()
            .collect()
    }

    /// Registered types cached per partition.
    pub fn partitioned(&self) -> Vec<EntityDescriptor> {
        self.types
            .read()
            .unwrap()
            .values()
            .filter(|d| d.policy.scope == CacheScope::Partition)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
