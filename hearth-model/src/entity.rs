use crate::policy::{EntityDescriptor, EntityPolicy};
use hearth_types::{EntityId, KeyGroup};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Change requested for an entity in the current transaction.
///
/// Priority when several are requested before commit:
/// `Delete` > `Insert` > `Update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityAction {
    Delete,
    Insert,
    Update,
}

impl EntityAction {
    /// Lower rank wins.
    const fn rank(self) -> u8 {
        match self {
            EntityAction::Delete => 0,
            EntityAction::Insert => 1,
            EntityAction::Update => 2,
        }
    }

    /// Returns true if `self` takes precedence over `other`.
    #[must_use]
    pub const fn outranks(self, other: EntityAction) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityAction::Delete => write!(f, "delete"),
            EntityAction::Insert => write!(f, "insert"),
            EntityAction::Update => write!(f, "update"),
        }
    }
}

/// Header carried by every entity.
///
/// `action` is transient: it is never serialized and is cleared once the
/// change set it belongs to has been committed or discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    pub version: u32,
    #[serde(skip)]
    action: Option<EntityAction>,
}

impl EntityMeta {
    /// Header for a new, not yet inserted entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for an entity loaded from a store or cache.
    #[must_use]
    pub fn loaded(id: EntityId, version: u32) -> Self {
        Self {
            id,
            version,
            action: None,
        }
    }

    /// Pending action, if any.
    #[must_use]
    pub fn action(&self) -> Option<EntityAction> {
        self.action
    }

    /// Requests `action`, honoring priority.
    ///
    /// Returns false (and leaves the pending action alone) when a
    /// higher-priority action is already pending.
    pub fn request(&mut self, action: EntityAction) -> bool {
        match self.action {
            Some(current) if current.outranks(action) => false,
            _ => {
                self.action = Some(action);
                true
            }
        }
    }

    /// Forgets the pending action.
    pub fn clear_action(&mut self) {
        self.action = None;
    }
}

/// A persistent, versioned record managed by the entity runtime.
///
/// Implementations are plain structs embedding an [`EntityMeta`]; deep copies
/// go through the type's own `Clone`.
///
/// ```
/// use hearth_model::{CacheScope, CacheTier, Entity, EntityMeta, EntityPolicy, StoreKind};
/// use hearth_types::KeyGroup;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Character {
///     #[serde(flatten)]
///     meta: EntityMeta,
///     account_id: u64,
///     name: String,
/// }
///
/// impl Entity for Character {
///     const TYPE_NAME: &'static str = "character";
///     const POLICY: EntityPolicy =
///         EntityPolicy::new(StoreKind::Relational, CacheTier::Memory, CacheScope::Partition);
///
///     fn meta(&self) -> &EntityMeta { &self.meta }
///     fn meta_mut(&mut self) -> &mut EntityMeta { &mut self.meta }
///     fn key_group(&self) -> KeyGroup { KeyGroup::new(self.account_id) }
/// }
/// ```
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name; also the table / collection name.
    const TYPE_NAME: &'static str;

    /// Storage and caching policy for the type.
    const POLICY: EntityPolicy;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Group this entity is cached and scheduled under.
    fn key_group(&self) -> KeyGroup;

    /// Shorthand for `meta().id`.
    fn id(&self) -> EntityId {
        self.meta().id
    }

    /// Shorthand for `meta().version`.
    fn version(&self) -> u32 {
        self.meta().version
    }
}

/// Type-erased entity, as held by caches and change sets.
///
/// Every [`Entity`] implements this through a blanket impl. The accessor
/// names differ from [`Entity`]'s so calls on concrete types stay
/// unambiguous.
pub trait AnyEntity: Any + Send + Sync + fmt::Debug {
    fn descriptor(&self) -> EntityDescriptor;

    fn type_name(&self) -> &'static str;

    fn entity_meta(&self) -> &EntityMeta;

    fn entity_meta_mut(&mut self) -> &mut EntityMeta;

    fn entity_key_group(&self) -> KeyGroup;

    fn clone_boxed(&self) -> Box<dyn AnyEntity>;

    /// Serializes the full entity (header included) as JSON.
    fn to_json(&self) -> serde_json::Result<String>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Entity> AnyEntity for T {
    fn descriptor(&self) -> EntityDescriptor {
        EntityDescriptor::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn entity_meta(&self) -> &EntityMeta {
        self.meta()
    }

    fn entity_meta_mut(&mut self) -> &mut EntityMeta {
        self.meta_mut()
    }

    fn entity_key_group(&self) -> KeyGroup {
        self.key_group()
    }

    fn clone_boxed(&self) -> Box<dyn AnyEntity> {
        Box::new(self.clone())
    }

    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn AnyEntity {
    /// Policy of the underlying type.
    pub fn policy(&self) -> EntityPolicy {
        self.descriptor().policy
    }

    /// Shorthand for the entity id.
    pub fn id(&self) -> EntityId {
        self.entity_meta().id
    }

    /// Shorthand for the pending action.
    pub fn action(&self) -> Option<EntityAction> {
        self.entity_meta().action()
    }

    /// Borrows the concrete entity if it is a `T`.
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Converts back into the concrete entity if it is a `T`.
    pub fn downcast<T: Entity>(self: Box<Self>) -> Result<T, Box<dyn AnyEntity>> {
        if (*self).as_any().is::<T>() {
            match AnyEntity::into_any(self).downcast::<T>() {
                Ok(entity) => Ok(*entity),
                Err(_) => unreachable!("type checked above"),
            }
        } else {
            Err(self)
        }
    }
}

impl Clone for Box<dyn AnyEntity> {
    fn clone(&self) -> Self {
        (**self).clone_boxed()
    }
}
