//! Behaviour every shared tier must share, run against both
//! implementations.

mod common;

use common::{boxed, change, hero, heroes, ids, pouch, pouches, Hero};
use hearth_cache::{CacheError, DistributedCache, Eviction, MemoryCache, MemoryKvStore, TierCache};
use hearth_model::{AnyEntity, EntityAction};
use hearth_types::KeyGroup;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const IDLE: Duration = Duration::from_secs(60);
const LOCK_WAIT: Duration = Duration::from_millis(30);

fn memory() -> MemoryCache {
    let cache = MemoryCache::new(IDLE, LOCK_WAIT);
    cache.register(&heroes());
    cache.register(&pouches());
    cache
}

fn distributed() -> DistributedCache {
    DistributedCache::new(Arc::new(MemoryKvStore::new()), IDLE, LOCK_WAIT, 1)
}

/// Hydrates group 7 of heroes with two entities at version 1.
fn seeded(cache: &dyn TierCache) {
    cache.lock_group(&heroes(), KeyGroup::new(7)).unwrap();
    cache
        .sync_in(&heroes(), KeyGroup::new(7), vec![boxed(hero(1, 7, 1, 10)), boxed(hero(2, 7, 1, 20))])
        .unwrap();
    cache.unlock_group(&heroes(), KeyGroup::new(7)).unwrap();
}

macro_rules! tier_suite {
    ($($name:ident),* $(,)?) => {
        mod memory_tier {
            $(
                #[test]
                fn $name() {
                    super::$name(&super::memory());
                }
            )*
        }

        mod distributed_tier {
            $(
                #[test]
                fn $name() {
                    super::$name(&super::distributed());
                }
            )*
        }
    };
}

tier_suite!(
    miss_before_hydration,
    sync_in_hydrates,
    sync_in_keeps_cached_copies,
    group_lock_times_out,
    group_lock_is_reentrant_after_unlock,
    entity_locks_are_exclusive,
    failed_lock_releases_partial_locks,
    version_check_accepts_matching_update,
    version_check_rejects_stale_update,
    version_check_rejects_duplicate_insert,
    version_check_rejects_missing_update,
    version_check_ignores_deletes,
    save_writes_through,
    save_removes_deletes,
    sync_out_prefers_cache,
    evict_forgets_group,
    partition_scoped_types,
);

fn miss_before_hydration(cache: &dyn TierCache) {
    assert!(cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().is_none());
    assert!(!cache.is_hydrated(&heroes(), KeyGroup::new(7)).unwrap());
}

fn sync_in_hydrates(cache: &dyn TierCache) {
    seeded(cache);
    assert!(cache.is_hydrated(&heroes(), KeyGroup::new(7)).unwrap());
    let group = cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().unwrap();
    assert_eq!(ids(&group), vec![1, 2]);
}

fn sync_in_keeps_cached_copies(cache: &dyn TierCache) {
    seeded(cache);
    cache
        .sync_in(&heroes(), KeyGroup::new(7), vec![boxed(hero(1, 7, 1, 999)), boxed(hero(3, 7, 1, 0))])
        .unwrap();
    let group = cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().unwrap();
    assert_eq!(ids(&group), vec![1, 2, 3]);
    assert_eq!(group[0].downcast_ref::<Hero>().unwrap().gold, 10);
}

fn group_lock_times_out(cache: &dyn TierCache) {
    cache.lock_group(&heroes(), KeyGroup::new(9)).unwrap();
    let err = cache.lock_group(&heroes(), KeyGroup::new(9)).unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { type_name: "hero", .. }));
    cache.unlock_group(&heroes(), KeyGroup::new(9)).unwrap();
}

fn group_lock_is_reentrant_after_unlock(cache: &dyn TierCache) {
    cache.lock_group(&heroes(), KeyGroup::new(9)).unwrap();
    cache.unlock_group(&heroes(), KeyGroup::new(9)).unwrap();
    cache.lock_group(&heroes(), KeyGroup::new(9)).unwrap();
    cache.unlock_group(&heroes(), KeyGroup::new(9)).unwrap();
}

fn entity_locks_are_exclusive(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![change(hero(1, 7, 1, 11), EntityAction::Update)];
    assert!(cache.lock_entities(&batch).unwrap());
    assert!(!cache.lock_entities(&batch).unwrap());
    cache.unlock_entities(&batch).unwrap();
    assert!(cache.lock_entities(&batch).unwrap());
    cache.unlock_entities(&batch).unwrap();
}

fn failed_lock_releases_partial_locks(cache: &dyn TierCache) {
    seeded(cache);
    let second = vec![change(hero(2, 7, 1, 0), EntityAction::Update)];
    assert!(cache.lock_entities(&second).unwrap());

    let both = vec![
        change(hero(1, 7, 1, 0), EntityAction::Update),
        change(hero(2, 7, 1, 0), EntityAction::Update),
    ];
    assert!(!cache.lock_entities(&both).unwrap());

    // Entity 1 must not have stayed locked by the failed attempt.
    let first = vec![change(hero(1, 7, 1, 0), EntityAction::Update)];
    assert!(cache.lock_entities(&first).unwrap());
    cache.unlock_entities(&first).unwrap();
    cache.unlock_entities(&second).unwrap();
}

fn version_check_accepts_matching_update(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![
        change(hero(1, 7, 1, 0), EntityAction::Update),
        change(hero(2, 7, 1, 0), EntityAction::Delete),
        change(hero(3, 7, 0, 0), EntityAction::Insert),
    ];
    assert!(cache.check_version(&batch).unwrap());
}

fn version_check_rejects_stale_update(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![change(hero(1, 7, 0, 0), EntityAction::Update)];
    assert!(!cache.check_version(&batch).unwrap());
}

fn version_check_rejects_duplicate_insert(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![change(hero(2, 7, 0, 0), EntityAction::Insert)];
    assert!(!cache.check_version(&batch).unwrap());
}

fn version_check_rejects_missing_update(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![change(hero(42, 7, 1, 0), EntityAction::Update)];
    assert!(!cache.check_version(&batch).unwrap());
}

fn version_check_ignores_deletes(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![
        change(hero(1, 7, 0, 0), EntityAction::Delete),
        change(hero(42, 7, 5, 0), EntityAction::Delete),
    ];
    assert!(cache.check_version(&batch).unwrap());
    assert!(cache.save(&batch).unwrap());
    let group = cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().unwrap();
    assert_eq!(ids(&group), vec![2]);
}

fn save_writes_through(cache: &dyn TierCache) {
    seeded(cache);
    let batch = vec![
        change(hero(1, 7, 2, 15), EntityAction::Update),
        change(hero(3, 7, 1, 5), EntityAction::Insert),
    ];
    assert!(cache.save(&batch).unwrap());

    let group = cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().unwrap();
    assert_eq!(ids(&group), vec![1, 2, 3]);
    let first = group[0].downcast_ref::<Hero>().unwrap();
    assert_eq!(first.gold, 15);
    assert_eq!(first.meta.version, 2);
    assert!(group.iter().all(|e| e.action().is_none()));
}

fn save_removes_deletes(cache: &dyn TierCache) {
    seeded(cache);
    assert!(cache.save(&[change(hero(2, 7, 2, 0), EntityAction::Delete)]).unwrap());
    let group = cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().unwrap();
    assert_eq!(ids(&group), vec![1]);
}

fn sync_out_prefers_cache(cache: &dyn TierCache) {
    seeded(cache);
    cache.save(&[change(hero(1, 7, 2, 15), EntityAction::Update)]).unwrap();
    cache.save(&[change(hero(2, 7, 2, 0), EntityAction::Delete)]).unwrap();

    // Rows as a store would still return them, plus one from an unloaded group.
    let rows: Vec<Box<dyn AnyEntity>> = vec![
        boxed(hero(1, 7, 1, 10)),
        boxed(hero(2, 7, 1, 20)),
        boxed(hero(8, 99, 3, 1)),
    ];
    let reconciled = cache.sync_out(&heroes(), rows).unwrap();
    assert_eq!(ids(&reconciled), vec![1, 8]);
    assert_eq!(reconciled[0].entity_meta().version, 2);
    assert_eq!(reconciled[1].entity_meta().version, 3);
}

fn evict_forgets_group(cache: &dyn TierCache) {
    seeded(cache);
    assert_eq!(cache.evict(&heroes(), KeyGroup::new(7)).unwrap(), Eviction::Evicted);
    assert_eq!(cache.evict(&heroes(), KeyGroup::new(7)).unwrap(), Eviction::Absent);
    assert!(!cache.is_hydrated(&heroes(), KeyGroup::new(7)).unwrap());
    assert!(cache.select_by_key(&heroes(), KeyGroup::new(7)).unwrap().is_none());
}

fn partition_scoped_types(cache: &dyn TierCache) {
    cache.lock_group(&pouches(), KeyGroup::new(7)).unwrap();
    cache
        .sync_in(&pouches(), KeyGroup::new(7), vec![boxed(pouch(1, 7, 1, 3))])
        .unwrap();
    cache.unlock_group(&pouches(), KeyGroup::new(7)).unwrap();

    assert!(cache.is_hydrated(&pouches(), KeyGroup::new(7)).unwrap());
    assert!(!cache.is_hydrated(&heroes(), KeyGroup::new(7)).unwrap());

    let batch = vec![change(pouch(1, 7, 1, 4), EntityAction::Update)];
    assert!(cache.lock_entities(&batch).unwrap());
    assert!(cache.check_version(&batch).unwrap());
    cache.unlock_entities(&batch).unwrap();
}
