//! Write-behind persistence of committed changes.

use crate::error::EntityResult;
use hearth_cache::{PendingWrite, PendingWrites};
use hearth_model::{AnyEntity, EntityAction, StoreKind};
use hearth_scheduler::{FairScheduler, SchedulerConfig, SchedulerStats, TaskError, TaskHandler};
use hearth_storage::{Connector, StorageResult, StoredRecord};
use hearth_types::KeyGroup;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// The two backing stores, routed to by [`StoreKind`].
#[derive(Clone)]
pub struct Connectors {
    pub relational: Arc<dyn Connector>,
    pub document: Arc<dyn Connector>,
}

impl Connectors {
    pub fn new(relational: Arc<dyn Connector>, document: Arc<dyn Connector>) -> Self {
        Self { relational, document }
    }

    pub fn for_store(&self, store: StoreKind) -> &dyn Connector {
        match store {
            StoreKind::Relational => self.relational.as_ref(),
            StoreKind::Document => self.document.as_ref(),
        }
    }
}

/// One committed entity waiting to reach its store. The entity still
/// carries the action it was committed with.
#[derive(Debug)]
pub struct WriteTask {
    pub entity: Box<dyn AnyEntity>,
    /// Keeps the key group pinned in the cache until the task is dropped.
    pending: PendingWrite,
}

impl WriteTask {
    pub fn key_group(&self) -> KeyGroup {
        self.pending.key()
    }
}

struct WriteHandler {
    connectors: Connectors,
}

impl WriteHandler {
    fn write(&self, entity: &dyn AnyEntity, action: EntityAction) -> StorageResult<()> {
        let connector = self.connectors.for_store(entity.policy().store);
        let type_name = entity.type_name();
        match action {
            EntityAction::Insert => connector.insert(type_name, &StoredRecord::from_entity(entity)?),
            EntityAction::Update => connector.update(type_name, &StoredRecord::from_entity(entity)?),
            EntityAction::Delete => connector.delete(type_name, entity.entity_key_group(), entity.id()),
        }
    }
}

impl TaskHandler<KeyGroup, WriteTask> for WriteHandler {
    fn execute(&self, _key: &KeyGroup, task: WriteTask) -> Result<(), TaskError> {
        let entity = &*task.entity;
        let Some(action) = entity.action() else {
            warn!(type_name = entity.type_name(), id = %entity.id(), "write task without action");
            return Ok(());
        };
        self.write(entity, action).map_err(|e| {
            TaskError::failed(format!(
                "{action} of {} {} failed: {e}",
                entity.type_name(),
                entity.id()
            ))
        })
    }

    fn exception_caught(&self, key: &KeyGroup, error: &TaskError) {
        error!(key_group = %key, %error, "write-behind task failed");
    }
}

/// Queues committed changes and writes them to the stores in the
/// background, one FIFO per key group.
///
/// Changes of the same key group reach the store in commit order; different
/// key groups are written in parallel.
///
/// Every queued write is counted in a [`PendingWrites`] shared with the
/// memory tier, which keeps the key group cached until the write is done.
pub struct WriteBehind {
    scheduler: FairScheduler<KeyGroup, WriteTask>,
    pending: Arc<PendingWrites>,
}

impl WriteBehind {
    pub fn new(config: SchedulerConfig, connectors: Connectors, pending: Arc<PendingWrites>) -> Self {
        Self {
            scheduler: FairScheduler::new("hearth-db", config, WriteHandler { connectors }),
            pending,
        }
    }

    pub fn start(&self) -> EntityResult<()> {
        self.scheduler.start()?;
        Ok(())
    }

    /// Queues a committed entity. Dropped with a warning once shut down.
    pub fn submit(&self, entity: Box<dyn AnyEntity>) {
        let key = entity.entity_key_group();
        let (type_name, id) = (entity.type_name(), entity.id());
        let pending = self.pending.track(key);
        if let Err(e) = self.scheduler.add(key, WriteTask { entity, pending }) {
            warn!(type_name, %id, key_group = %key, error = %e, "write dropped");
        }
    }

    /// Writes queued and not yet started.
    pub fn pending(&self) -> usize {
        self.scheduler.estimated_task_count()
    }

    /// Writes of key group `key` queued or running.
    pub fn pending_for(&self, key: KeyGroup) -> usize {
        self.pending.count(key)
    }

    pub fn pending_writes(&self) -> &Arc<PendingWrites> {
        &self.pending
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Returns true once every submitted write has run.
    pub fn is_idle(&self) -> bool {
        let stats = self.scheduler.stats();
        stats.completed + stats.failed >= stats.submitted && self.pending.total() == 0
    }

    /// Polls until idle. Returns false if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stops the workers and writes everything still queued on the calling
    /// thread. Returns how many writes were drained.
    pub fn shutdown(&self) -> usize {
        self.scheduler.terminate(false)
    }
}
