//! Transaction-local cache.

use hearth_model::{AnyEntity, EntityAction};
use hearth_types::{EntityId, KeyGroup};
use std::collections::{BTreeMap, HashMap};

type ChangeKey = (&'static str, KeyGroup, EntityId);

/// Snapshots and pending changes of one transaction attempt.
///
/// Never shared between threads. Snapshots are clones taken from a shared
/// tier; changes are clones registered by the transaction. Reads through
/// [`snapshot`](Self::snapshot) overlay the changes on the snapshot so the
/// transaction sees its own writes.
#[derive(Debug, Default)]
pub struct LocalCache {
    snapshots: HashMap<(&'static str, KeyGroup), Vec<Box<dyn AnyEntity>>>,
    changes: BTreeMap<ChangeKey, Box<dyn AnyEntity>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The group as this transaction sees it, or `None` if it has not been
    /// read in this attempt.
    pub fn snapshot(&self, type_name: &'static str, key: KeyGroup) -> Option<Vec<Box<dyn AnyEntity>>> {
        let base = self.snapshots.get(&(type_name, key))?;
        let mut view: BTreeMap<EntityId, Box<dyn AnyEntity>> =
            base.iter().map(|e| (e.id(), e.clone_boxed())).collect();
        for ((_, _, id), change) in self.changes.range(group_range(type_name, key)) {
            if change.action() == Some(EntityAction::Delete) {
                view.remove(id);
            } else {
                view.insert(*id, change.clone_boxed());
            }
        }
        Some(view.into_values().collect())
    }

    /// Remembers a group read from a shared tier.
    pub fn put_snapshot(&mut self, type_name: &'static str, key: KeyGroup, entities: Vec<Box<dyn AnyEntity>>) {
        self.snapshots.insert((type_name, key), entities);
    }

    /// Applies this transaction's changes to rows read outside the local
    /// cache: changed rows are replaced, deleted rows dropped.
    pub fn overlay(&self, rows: Vec<Box<dyn AnyEntity>>) -> Vec<Box<dyn AnyEntity>> {
        rows.into_iter()
            .filter_map(|row| {
                let key = (row.type_name(), row.entity_key_group(), row.id());
                match self.changes.get(&key) {
                    Some(change) if change.action() == Some(EntityAction::Delete) => None,
                    Some(change) => Some(change.clone_boxed()),
                    None => Some(row),
                }
            })
            .collect()
    }

    /// Registers `entity` as changed with `action`.
    ///
    /// A second registration of the same entity keeps the newer data and
    /// the higher-priority action (Delete > Insert > Update). Deleting an
    /// entity inserted by this same transaction drops both changes.
    pub fn entity_changes(&mut self, mut entity: Box<dyn AnyEntity>, action: EntityAction) {
        let key = (entity.type_name(), entity.entity_key_group(), entity.id());
        let pending = self.changes.get(&key).and_then(|previous| previous.action());
        if pending == Some(EntityAction::Insert) && action == EntityAction::Delete {
            self.changes.remove(&key);
            return;
        }
        entity.entity_meta_mut().clear_action();
        if let Some(pending) = pending {
            entity.entity_meta_mut().request(pending);
        }
        entity.entity_meta_mut().request(action);
        self.changes.insert(key, entity);
    }

    /// Pending changes, sorted by `(type, key group, id)`.
    pub fn changes(&self) -> Vec<Box<dyn AnyEntity>> {
        self.changes.values().map(|e| e.clone_boxed()).collect()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.changes.is_empty()
    }

    /// Forgets every snapshot and change.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.changes.clear();
    }
}

fn group_range(type_name: &'static str, key: KeyGroup) -> std::ops::RangeInclusive<ChangeKey> {
    (type_name, key, EntityId::from_raw(0))..=(type_name, key, EntityId::from_raw(u64::MAX))
}
