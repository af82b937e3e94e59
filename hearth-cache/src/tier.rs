use crate::error::CacheResult;
use crate::expiring::Eviction;
use hearth_model::{AnyEntity, CacheTier, EntityDescriptor};
use hearth_types::KeyGroup;

/// A shared cache tier holding the authoritative copy of entities.
///
/// Reads return deep copies. Commit-time calls (`lock_entities`,
/// `check_version`, `save`, `unlock_entities`) receive the entities of one
/// commit already sorted by `(type, key group, id)`.
pub trait TierCache: Send + Sync {
    fn tier(&self) -> CacheTier;

    /// Every cached entity of the group, or `None` when the group has not
    /// been fully loaded.
    fn select_by_key(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
    ) -> CacheResult<Option<Vec<Box<dyn AnyEntity>>>>;

    fn is_hydrated(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<bool>;

    /// Takes the full-group lock, failing with
    /// [`CacheError::LockTimeout`](crate::CacheError::LockTimeout) after the
    /// configured wait.
    fn lock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()>;

    fn unlock_group(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<()>;

    /// Stores entities loaded from a backing store and marks the group as
    /// fully loaded. Entities already cached keep their cached copy.
    fn sync_in(
        &self,
        descriptor: &EntityDescriptor,
        key: KeyGroup,
        loaded: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<()>;

    /// Reconciles rows read directly from a store against the cache.
    ///
    /// Rows of fully loaded groups are replaced by their cached copy, or
    /// dropped when the cache no longer has them (deleted, not yet flushed).
    /// Rows of other groups pass through unchanged.
    fn sync_out(
        &self,
        descriptor: &EntityDescriptor,
        rows: Vec<Box<dyn AnyEntity>>,
    ) -> CacheResult<Vec<Box<dyn AnyEntity>>>;

    /// Tries once to lock every entity. Returns false, with nothing left
    /// locked, when any lock is busy or a group is no longer cached.
    fn lock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool>;

    fn unlock_entities(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<()>;

    /// Inserts must not exist yet; updates must exist at the same version.
    /// Deletes are not checked.
    fn check_version(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool>;

    /// Writes the commit through: deletes are removed, everything else is
    /// stored as given (versions already bumped by the caller).
    fn save(&self, entities: &[Box<dyn AnyEntity>]) -> CacheResult<bool>;

    /// Drops the cached group unless it is in use.
    fn evict(&self, descriptor: &EntityDescriptor, key: KeyGroup) -> CacheResult<Eviction>;
}
