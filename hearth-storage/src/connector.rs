use crate::error::{StorageError, StorageResult};
use hearth_model::{AnyEntity, EntityDescriptor, StoreKind};
use hearth_types::{EntityId, KeyGroup};
use serde_json::Value;

/// One persisted entity as it crosses the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: EntityId,
    pub key_group: KeyGroup,
    pub version: u32,
    /// Full entity serialized as JSON (header included).
    pub data: String,
}

impl StoredRecord {
    /// Snapshot of `entity` ready to be written.
    pub fn from_entity(entity: &dyn AnyEntity) -> StorageResult<Self> {
        let meta = entity.entity_meta();
        Ok(Self {
            id: meta.id,
            key_group: entity.entity_key_group(),
            version: meta.version,
            data: entity.to_json()?,
        })
    }

    /// Rebuilds the entity through its descriptor.
    ///
    /// The id and version columns are authoritative; they overwrite whatever
    /// the JSON body carries.
    pub fn decode(&self, descriptor: &EntityDescriptor) -> StorageResult<Box<dyn AnyEntity>> {
        let mut entity = descriptor.decode(&self.data)?;
        let meta = entity.entity_meta_mut();
        meta.id = self.id;
        meta.version = self.version;
        Ok(entity)
    }
}

/// Equality filter over JSON documents, addressed by JSON pointer.
///
/// ```
/// use hearth_storage::DocumentFilter;
/// use serde_json::json;
///
/// let filter = DocumentFilter::new().eq("/name", json!("Aria"));
/// assert!(filter.matches(&json!({"name": "Aria", "level": 3})));
/// assert!(!filter.matches(&json!({"name": "Bram"})));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    key_group: Option<KeyGroup>,
    fields: Vec<(String, Value)>,
}

impl DocumentFilter {
    /// Filter matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the value at `pointer` (e.g. `/stats/level`) to equal `value`.
    #[must_use]
    pub fn eq(mut self, pointer: impl Into<String>, value: Value) -> Self {
        self.fields.push((pointer.into(), value));
        self
    }

    /// Restricts the scan to one key group.
    #[must_use]
    pub fn in_group(mut self, key: KeyGroup) -> Self {
        self.key_group = Some(key);
        self
    }

    pub fn key_group(&self) -> Option<KeyGroup> {
        self.key_group
    }

    /// Returns true if every field filter holds for `doc`.
    pub fn matches(&self, doc: &Value) -> bool {
        self.fields
            .iter()
            .all(|(pointer, expected)| doc.pointer(pointer) == Some(expected))
    }
}

/// Store-specific query passed to [`Connector::select_custom`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Raw `WHERE` clause run against one relational shard.
    Where { shard: u32, clause: String },
    /// Field filter run against a document collection.
    Document(DocumentFilter),
}

/// A backing store holding one table / collection per registered type.
///
/// Calls are blocking and serialized per connection; callers run them on
/// scheduler workers, never on latency-sensitive threads.
pub trait Connector: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Creates the table / collection for a type (idempotent).
    fn register(&self, descriptor: &EntityDescriptor) -> StorageResult<()>;

    fn insert(&self, type_name: &str, record: &StoredRecord) -> StorageResult<()>;

    /// Overwrites version and data of an existing row. A missing row is
    /// logged, not an error.
    fn update(&self, type_name: &str, record: &StoredRecord) -> StorageResult<()>;

    /// Removes a row. A missing row is logged, not an error.
    fn delete(&self, type_name: &str, key_group: KeyGroup, id: EntityId) -> StorageResult<()>;

    /// Every row of `type_name` in key group `key`.
    fn select_by_key(&self, type_name: &str, key: KeyGroup) -> StorageResult<Vec<StoredRecord>>;

    /// Rows matching a store-specific condition.
    fn select_custom(&self, type_name: &str, condition: &Condition) -> StorageResult<Vec<StoredRecord>>;

    /// Identifiers of every physical shard.
    fn shard_ids(&self) -> Vec<u32>;
}

pub(crate) fn unsupported(kind: StoreKind, condition: &Condition) -> StorageError {
    StorageError::InvalidCondition(format!("{condition:?} is not supported by the {kind:?} store"))
}
