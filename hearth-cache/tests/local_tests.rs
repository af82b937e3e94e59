mod common;

use common::{boxed, hero, ids, Hero};
use hearth_cache::LocalCache;
use hearth_model::{AnyEntity, EntityAction};
use hearth_types::KeyGroup;
use pretty_assertions::assert_eq;

fn with_group() -> LocalCache {
    let mut local = LocalCache::new();
    local.put_snapshot("hero", KeyGroup::new(7), vec![boxed(hero(1, 7, 1, 10)), boxed(hero(2, 7, 1, 20))]);
    local
}

#[test]
fn unknown_group_is_a_miss() {
    let local = LocalCache::new();
    assert!(local.snapshot("hero", KeyGroup::new(7)).is_none());
    assert!(local.is_empty());
}

#[test]
fn snapshot_returns_copies() {
    let local = with_group();
    let mut view = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    view[0].entity_meta_mut().version = 40;
    let again = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    assert_eq!(again[0].entity_meta().version, 1);
}

// ── Read-your-writes ─────────────────────────────────────────────

#[test]
fn inserts_show_up_in_snapshot() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(3, 7, 0, 5)), EntityAction::Insert);
    let view = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    assert_eq!(ids(&view), vec![1, 2, 3]);
}

#[test]
fn updates_replace_snapshot_entries() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(1, 7, 1, 99)), EntityAction::Update);
    let view = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    assert_eq!(view[0].downcast_ref::<Hero>().unwrap().gold, 99);
}

#[test]
fn deletes_hide_snapshot_entries() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(2, 7, 1, 20)), EntityAction::Delete);
    let view = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    assert_eq!(ids(&view), vec![1]);
}

#[test]
fn changes_to_other_groups_stay_out() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(9, 8, 0, 5)), EntityAction::Insert);
    let view = local.snapshot("hero", KeyGroup::new(7)).unwrap();
    assert_eq!(ids(&view), vec![1, 2]);
}

// ── Change set ───────────────────────────────────────────────────

#[test]
fn repeated_changes_merge_by_priority() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(1, 7, 1, 11)), EntityAction::Delete);
    local.entity_changes(boxed(hero(1, 7, 1, 12)), EntityAction::Update);

    let changes = local.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action(), Some(EntityAction::Delete));
    assert_eq!(changes[0].downcast_ref::<Hero>().unwrap().gold, 12);
}

#[test]
fn update_after_insert_stays_insert() {
    let mut local = LocalCache::new();
    local.entity_changes(boxed(hero(5, 7, 0, 1)), EntityAction::Insert);
    local.entity_changes(boxed(hero(5, 7, 0, 2)), EntityAction::Update);
    let changes = local.changes();
    assert_eq!(changes[0].action(), Some(EntityAction::Insert));
    assert_eq!(changes[0].downcast_ref::<Hero>().unwrap().gold, 2);
}

#[test]
fn delete_after_insert_cancels() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(5, 7, 0, 1)), EntityAction::Insert);
    local.entity_changes(boxed(hero(5, 7, 0, 1)), EntityAction::Delete);
    assert_eq!(local.change_count(), 0);
    assert_eq!(ids(&local.snapshot("hero", KeyGroup::new(7)).unwrap()), vec![1, 2]);
}

#[test]
fn changes_are_sorted() {
    let mut local = LocalCache::new();
    local.entity_changes(boxed(hero(9, 8, 1, 0)), EntityAction::Update);
    local.entity_changes(boxed(hero(4, 7, 1, 0)), EntityAction::Update);
    local.entity_changes(boxed(hero(2, 7, 1, 0)), EntityAction::Update);
    assert_eq!(ids(&local.changes()), vec![2, 4, 9]);
}

#[test]
fn overlay_applies_changes_to_rows() {
    let mut local = LocalCache::new();
    local.entity_changes(boxed(hero(1, 7, 1, 50)), EntityAction::Update);
    local.entity_changes(boxed(hero(2, 7, 1, 0)), EntityAction::Delete);

    let rows: Vec<Box<dyn AnyEntity>> = vec![
        boxed(hero(1, 7, 1, 10)),
        boxed(hero(2, 7, 1, 20)),
        boxed(hero(3, 7, 1, 30)),
    ];
    let view = local.overlay(rows);
    assert_eq!(ids(&view), vec![1, 3]);
    assert_eq!(view[0].downcast_ref::<Hero>().unwrap().gold, 50);
}

#[test]
fn clear_forgets_everything() {
    let mut local = with_group();
    local.entity_changes(boxed(hero(3, 7, 0, 5)), EntityAction::Insert);
    local.clear();
    assert!(local.is_empty());
    assert!(local.snapshot("hero", KeyGroup::new(7)).is_none());
}
