use hearth_model::{Entity, EntityDescriptor, EntityMeta, EntityPolicy, StoreKind};
use hearth_storage::{
    Condition, Connector, DocumentFilter, ModuloSharding, RelationalConnector, ShardingStrategy,
    StorageError, StoredRecord,
};
use hearth_types::{EntityId, KeyGroup};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    #[serde(flatten)]
    meta: EntityMeta,
    owner: u64,
    name: String,
    count: u32,
}

impl Entity for Item {
    const TYPE_NAME: &'static str = "item";
    const POLICY: EntityPolicy = EntityPolicy::relational();

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn key_group(&self) -> KeyGroup {
        KeyGroup::new(self.owner)
    }
}

fn item(id: u64, owner: u64, count: u32) -> Item {
    Item {
        meta: EntityMeta::loaded(EntityId::from_raw(id), 1),
        owner,
        name: format!("item-{id}"),
        count,
    }
}

fn record(entity: &Item) -> StoredRecord {
    StoredRecord::from_entity(entity).unwrap()
}

fn store(shards: u32) -> RelationalConnector {
    let store = RelationalConnector::open_in_memory(shards).unwrap();
    store.register(&EntityDescriptor::of::<Item>()).unwrap();
    store
}

// ── Sharding ─────────────────────────────────────────────────────

#[test]
fn modulo_sharding() {
    assert_eq!(ModuloSharding.shard_for(KeyGroup::new(7), 4), 3);
    assert_eq!(ModuloSharding.shard_for(KeyGroup::new(8), 4), 0);
    assert_eq!(ModuloSharding.shard_for(KeyGroup::new(8), 1), 0);
}

#[test]
fn zero_shards_rejected() {
    assert!(matches!(
        RelationalConnector::open_in_memory(0),
        Err(StorageError::Sharding(_))
    ));
}

#[derive(Debug)]
struct Broken;

impl ShardingStrategy for Broken {
    fn shard_for(&self, _key: KeyGroup, shard_count: u32) -> u32 {
        shard_count + 1
    }
}

#[test]
fn out_of_range_shard_is_an_error() {
    let store = store(2).with_strategy(Broken);
    let err = store.insert("item", &record(&item(1, 7, 1))).unwrap_err();
    assert!(matches!(err, StorageError::Sharding(_)));
}

#[test]
fn shard_ids_cover_every_shard() {
    assert_eq!(store(3).shard_ids(), vec![0, 1, 2]);
    assert_eq!(store(3).kind(), StoreKind::Relational);
}

#[test]
fn rows_land_on_their_shard_only() {
    let store = store(2);
    store.insert("item", &record(&item(1, 7, 1))).unwrap();
    store.insert("item", &record(&item(2, 8, 1))).unwrap();

    let shard1 = store
        .select_custom("item", &Condition::Where { shard: 1, clause: "1 = 1".into() })
        .unwrap();
    assert_eq!(shard1.len(), 1);
    assert_eq!(shard1[0].key_group, KeyGroup::new(7));

    let shard0 = store
        .select_custom("item", &Condition::Where { shard: 0, clause: "1 = 1".into() })
        .unwrap();
    assert_eq!(shard0.len(), 1);
    assert_eq!(shard0[0].key_group, KeyGroup::new(8));
}

// ── CRUD ─────────────────────────────────────────────────────────

#[test]
fn insert_and_select_by_key() {
    let store = store(4);
    let a = item(1, 7, 3);
    let b = item(2, 7, 4);
    store.insert("item", &record(&a)).unwrap();
    store.insert("item", &record(&b)).unwrap();
    store.insert("item", &record(&item(3, 9, 0))).unwrap();

    let rows = store.select_by_key("item", KeyGroup::new(7)).unwrap();
    assert_eq!(rows.len(), 2);

    let descriptor = EntityDescriptor::of::<Item>();
    let decoded: Vec<Item> = rows
        .iter()
        .map(|r| r.decode(&descriptor).unwrap().downcast::<Item>().unwrap())
        .collect();
    assert_eq!(decoded, vec![a, b]);
}

#[test]
fn duplicate_insert_fails() {
    let store = store(1);
    store.insert("item", &record(&item(1, 7, 3))).unwrap();
    assert!(matches!(
        store.insert("item", &record(&item(1, 7, 3))),
        Err(StorageError::Sqlite(_))
    ));
}

#[test]
fn update_overwrites_version_and_data() {
    let store = store(2);
    let mut it = item(1, 7, 3);
    store.insert("item", &record(&it)).unwrap();

    it.count = 10;
    it.meta.version = 2;
    store.update("item", &record(&it)).unwrap();

    let rows = store.select_by_key("item", KeyGroup::new(7)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].version, 2);
    let back = rows[0]
        .decode(&EntityDescriptor::of::<Item>())
        .unwrap()
        .downcast::<Item>()
        .unwrap();
    assert_eq!(back.count, 10);
}

#[test]
fn update_of_missing_row_is_not_an_error() {
    let store = store(1);
    store.update("item", &record(&item(99, 7, 1))).unwrap();
    assert!(store.select_by_key("item", KeyGroup::new(7)).unwrap().is_empty());
}

#[test]
fn delete_removes_row() {
    let store = store(2);
    store.insert("item", &record(&item(1, 7, 3))).unwrap();
    store.delete("item", KeyGroup::new(7), EntityId::from_raw(1)).unwrap();
    assert!(store.select_by_key("item", KeyGroup::new(7)).unwrap().is_empty());

    // Deleting again only logs.
    store.delete("item", KeyGroup::new(7), EntityId::from_raw(1)).unwrap();
}

#[test]
fn select_custom_runs_where_clause() {
    let store = store(1);
    store.insert("item", &record(&item(1, 7, 3))).unwrap();
    store.insert("item", &record(&item(2, 8, 3))).unwrap();
    store.insert("item", &record(&item(3, 9, 3))).unwrap();

    let rows = store
        .select_custom("item", &Condition::Where { shard: 0, clause: "key_group >= 8".into() })
        .unwrap();
    let ids: Vec<u64> = rows.iter().map(|r| r.id.as_raw()).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn select_custom_rejects_document_filters() {
    let store = store(1);
    let err = store
        .select_custom("item", &Condition::Document(DocumentFilter::new()))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidCondition(_)));
}

#[test]
fn select_custom_rejects_missing_shard() {
    let store = store(2);
    let err = store
        .select_custom("item", &Condition::Where { shard: 5, clause: "1 = 1".into() })
        .unwrap_err();
    assert!(matches!(err, StorageError::Sharding(_)));
}

// ── Registration ─────────────────────────────────────────────────

#[test]
fn unregistered_type_is_rejected() {
    let store = RelationalConnector::open_in_memory(1).unwrap();
    let err = store.select_by_key("item", KeyGroup::new(1)).unwrap_err();
    assert!(matches!(err, StorageError::UnknownType(name) if name == "item"));
}

#[test]
fn registration_is_idempotent() {
    let store = store(2);
    store.register(&EntityDescriptor::of::<Item>()).unwrap();
    store.insert("item", &record(&item(1, 7, 3))).unwrap();
}

// ── Persistence ──────────────────────────────────────────────────

#[test]
fn file_backed_shards_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = RelationalConnector::open(dir.path(), 2).unwrap();
        store.register(&EntityDescriptor::of::<Item>()).unwrap();
        store.insert("item", &record(&item(1, 7, 3))).unwrap();
    }
    assert!(dir.path().join("shard_0.db").exists());
    assert!(dir.path().join("shard_1.db").exists());

    let store = RelationalConnector::open(dir.path(), 2).unwrap();
    store.register(&EntityDescriptor::of::<Item>()).unwrap();
    assert_eq!(store.select_by_key("item", KeyGroup::new(7)).unwrap().len(), 1);
}
