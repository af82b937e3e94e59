//! Service container wiring stores, tiers and workers together.

use crate::config::HearthConfig;
use crate::error::EntityResult;
use crate::manager::EntityManager;
use crate::transaction::{Transaction, TransactionRunner, TxOutcome};
use crate::writer::{Connectors, WriteBehind};
use hearth_cache::{DistributedCache, KeyValueStore, MemoryCache, MemoryKvStore};
use hearth_model::Entity;
use hearth_storage::{Connector, DocumentConnector, RelationalConnector};
use hearth_types::IdGenerator;
use std::sync::Arc;
use tracing::info;

/// One running entity runtime: id generator, stores, cache tiers,
/// write-behind workers and the manager over them.
///
/// Built once at startup and passed by reference to whatever needs it.
pub struct Hearth {
    config: HearthConfig,
    manager: Arc<EntityManager>,
    writer: Arc<WriteBehind>,
    runner: TransactionRunner,
}

impl Hearth {
    /// Opens the runtime described by `config`. A distributed tier, when
    /// enabled, runs over an in-process [`MemoryKvStore`].
    pub fn open(config: &HearthConfig) -> EntityResult<Self> {
        let store = config
            .cache
            .distributed
            .then(|| Arc::new(MemoryKvStore::new()) as Arc<dyn KeyValueStore>);
        Self::open_with_store(config, store)
    }

    /// Opens the runtime with the distributed tier over `store`; `None`
    /// runs without one regardless of `cache.distributed`.
    pub fn open_with_store(config: &HearthConfig, store: Option<Arc<dyn KeyValueStore>>) -> EntityResult<Self> {
        config.validate()?;
        let ids = Arc::new(IdGenerator::new(config.node_id)?);

        let relational: Arc<dyn Connector> = match &config.relational.path {
            Some(dir) => Arc::new(RelationalConnector::open(dir, config.relational.shard_count)?),
            None => Arc::new(RelationalConnector::open_in_memory(config.relational.shard_count)?),
        };
        let document: Arc<dyn Connector> = match &config.document.path {
            Some(path) => Arc::new(DocumentConnector::open(path)?),
            None => Arc::new(DocumentConnector::open_in_memory()?),
        };
        let connectors = Connectors::new(relational, document);

        let memory = Arc::new(MemoryCache::new(
            config.cache.idle_expire(),
            config.cache.group_lock_timeout(),
        ));
        let writer = Arc::new(WriteBehind::new(
            config.scheduler.pool(config.scheduler.database_threads),
            connectors.clone(),
            Arc::clone(memory.pending_writes()),
        ));
        writer.start()?;
        let mut manager = EntityManager::new(ids, connectors, memory, Arc::clone(&writer));
        if let Some(store) = store {
            manager = manager.with_distributed(Arc::new(DistributedCache::new(
                store,
                config.cache.idle_expire(),
                config.cache.group_lock_timeout(),
                config.node_id,
            )));
        }
        let manager = Arc::new(manager);

        let runner = TransactionRunner::new(
            Arc::clone(&manager),
            config.transaction.default_retry_count,
            config.transaction.retry_backoff(),
        );

        info!(
            node_id = config.node_id,
            shards = config.relational.shard_count,
            distributed = manager.has_distributed(),
            "hearth runtime opened"
        );
        Ok(Self {
            config: config.clone(),
            manager,
            writer,
            runner,
        })
    }

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    pub fn register<T: Entity>(&self) -> EntityResult<()> {
        self.manager.register::<T>()
    }

    pub fn manager(&self) -> &Arc<EntityManager> {
        &self.manager
    }

    pub fn runner(&self) -> &TransactionRunner {
        &self.runner
    }

    /// Shorthand for `runner().run(tx)`.
    pub fn run<T: Transaction + ?Sized>(&self, tx: &mut T) -> EntityResult<TxOutcome> {
        self.runner.run(tx)
    }

    /// Stops the write-behind workers, flushing every queued write on the
    /// calling thread. Returns how many writes were flushed.
    pub fn shutdown(&self) -> usize {
        let flushed = self.writer.shutdown();
        info!(flushed, "hearth runtime stopped");
        flushed
    }
}
