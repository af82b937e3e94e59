//! Optimistic transactions with automatic retry.

use crate::error::{EntityError, EntityResult};
use crate::manager::EntityManager;
use hearth_cache::LocalCache;
use hearth_model::{Entity, EntityAction};
use hearth_storage::Condition;
use hearth_types::{EntityId, KeyGroup};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// A unit of work committed atomically against the cache tiers.
///
/// `process` may run several times: after a conflicting commit, every
/// change of the attempt is discarded and `process` starts again from
/// fresh reads. Side effects outside the [`TxScope`] must tolerate that.
pub trait Transaction {
    fn name(&self) -> &str;

    /// Retries after the first attempt. `None` uses the runner's default;
    /// `Some(0)` fails on the first conflict.
    fn retry_count(&self) -> Option<u32> {
        None
    }

    fn process(&mut self, tx: &mut TxScope<'_>) -> EntityResult<()>;

    /// Called once when every attempt conflicted.
    fn failed(&mut self) {}
}

/// Closure-backed [`Transaction`], see [`from_fn`].
pub struct FnTransaction<F> {
    name: String,
    retry_count: Option<u32>,
    process: F,
}

/// Wraps a closure as a [`Transaction`].
///
/// ```no_run
/// # use hearth_entity::{transaction, Hearth, HearthConfig};
/// # let hearth = Hearth::open(&HearthConfig::default()).unwrap();
/// let mut tx = transaction::from_fn("noop", |_tx| Ok(()));
/// hearth.run(&mut tx).unwrap();
/// ```
pub fn from_fn<F>(name: impl Into<String>, process: F) -> FnTransaction<F>
where
    F: FnMut(&mut TxScope<'_>) -> EntityResult<()>,
{
    FnTransaction {
        name: name.into(),
        retry_count: None,
        process,
    }
}

impl<F> FnTransaction<F> {
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }
}

impl<F> Transaction for FnTransaction<F>
where
    F: FnMut(&mut TxScope<'_>) -> EntityResult<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_count(&self) -> Option<u32> {
        self.retry_count
    }

    fn process(&mut self, tx: &mut TxScope<'_>) -> EntityResult<()> {
        (self.process)(tx)
    }
}

/// Result of [`TransactionRunner::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Succeeded { attempts: u32 },
    /// Every attempt conflicted; `failed()` was called.
    Failed { attempts: u32 },
}

impl TxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            TxOutcome::Succeeded { attempts } | TxOutcome::Failed { attempts } => attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    NotStarted,
    Running,
    Committed,
    Retrying,
    Succeeded,
    Failed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::NotStarted => "not_started",
            TxState::Running => "running",
            TxState::Committed => "committed",
            TxState::Retrying => "retrying",
            TxState::Succeeded => "succeeded",
            TxState::Failed => "failed",
        };
        f.write_str(name)
    }
}

thread_local! {
    static IN_TRANSACTION: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a transaction until dropped.
struct ThreadBinding;

impl ThreadBinding {
    fn enter() -> EntityResult<Self> {
        IN_TRANSACTION.with(|bound| {
            if bound.replace(true) {
                Err(EntityError::NestedTransaction)
            } else {
                Ok(ThreadBinding)
            }
        })
    }
}

impl Drop for ThreadBinding {
    fn drop(&mut self) {
        IN_TRANSACTION.with(|bound| bound.set(false));
    }
}

/// Handle passed to [`Transaction::process`] for one attempt.
///
/// Reads return copies owned by the transaction. Writes are only
/// registered here; they reach the shared tiers when the attempt commits.
pub struct TxScope<'a> {
    manager: &'a EntityManager,
    local: &'a mut LocalCache,
    attempt: u32,
}

impl<'a> TxScope<'a> {
    /// Scope over an explicit local cache, for driving the manager without
    /// a runner.
    pub fn new(manager: &'a EntityManager, local: &'a mut LocalCache, attempt: u32) -> Self {
        Self { manager, local, attempt }
    }

    /// 1 on the first run of `process`, then 2, 3...
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn manager(&self) -> &EntityManager {
        self.manager
    }

    pub fn select_by_key<T: Entity>(&mut self, key: KeyGroup) -> EntityResult<Vec<T>> {
        self.manager.select_by_key(self.local, key)
    }

    pub fn select_custom<T: Entity>(&mut self, condition: &Condition) -> EntityResult<Vec<T>> {
        self.manager.select_custom(self.local, condition)
    }

    pub fn build_group<T: Entity>(&mut self, key: KeyGroup) -> EntityResult<()> {
        self.manager.build_group::<T>(key)
    }

    /// Registers `entity` for insertion, assigning it an id first if it has
    /// none. Returns the id.
    pub fn insert<T: Entity>(&mut self, entity: &mut T) -> EntityResult<EntityId> {
        self.manager.descriptor(T::TYPE_NAME)?;
        if entity.id().is_unassigned() {
            entity.meta_mut().id = self.manager.ids().next_id();
        }
        self.local.entity_changes(Box::new(entity.clone()), EntityAction::Insert);
        Ok(entity.id())
    }

    /// Registers the current state of `entity` as an update.
    pub fn update<T: Entity>(&mut self, entity: &T) -> EntityResult<()> {
        self.manager.descriptor(T::TYPE_NAME)?;
        self.local.entity_changes(Box::new(entity.clone()), EntityAction::Update);
        Ok(())
    }

    pub fn delete<T: Entity>(&mut self, entity: &T) -> EntityResult<()> {
        self.manager.descriptor(T::TYPE_NAME)?;
        self.local.entity_changes(Box::new(entity.clone()), EntityAction::Delete);
        Ok(())
    }

    /// Changes registered so far in this attempt.
    pub fn pending_changes(&self) -> usize {
        self.local.change_count()
    }
}

/// Runs [`Transaction`]s against an [`EntityManager`].
#[derive(Clone)]
pub struct TransactionRunner {
    manager: Arc<EntityManager>,
    default_retry_count: u32,
    backoff: Duration,
}

impl TransactionRunner {
    pub fn new(manager: Arc<EntityManager>, default_retry_count: u32, backoff: Duration) -> Self {
        Self {
            manager,
            default_retry_count,
            backoff,
        }
    }

    pub fn manager(&self) -> &Arc<EntityManager> {
        &self.manager
    }

    /// Runs `tx` on the calling thread until it commits or runs out of
    /// retries.
    ///
    /// Conflicts are retried; errors from `process` or the commit abort the
    /// run and are returned as-is. Fails with
    /// [`EntityError::NestedTransaction`] when called from inside another
    /// transaction on the same thread.
    pub fn run<T: Transaction + ?Sized>(&self, tx: &mut T) -> EntityResult<TxOutcome> {
        let _binding = ThreadBinding::enter()?;
        let retries = tx.retry_count().unwrap_or(self.default_retry_count);
        let mut local = LocalCache::new();
        let mut state = TxState::NotStarted;
        let mut attempt = 0;

        loop {
            attempt += 1;
            transition(tx.name(), &mut state, TxState::Running);
            tx.process(&mut TxScope::new(&self.manager, &mut local, attempt))?;

            let committed = self.manager.save(local.changes())?;
            local.clear();
            if committed {
                transition(tx.name(), &mut state, TxState::Committed);
                transition(tx.name(), &mut state, TxState::Succeeded);
                return Ok(TxOutcome::Succeeded { attempts: attempt });
            }
            if attempt > retries {
                transition(tx.name(), &mut state, TxState::Failed);
                debug!(transaction = tx.name(), attempts = attempt, "transaction gave up after conflicts");
                tx.failed();
                return Ok(TxOutcome::Failed { attempts: attempt });
            }
            transition(tx.name(), &mut state, TxState::Retrying);
            debug!(transaction = tx.name(), attempt, "commit conflicted, retrying");
            if !self.backoff.is_zero() {
                thread::sleep(self.backoff);
            }
        }
    }
}

fn transition(name: &str, state: &mut TxState, next: TxState) {
    trace!(transaction = name, from = %state, to = %next, "transaction state");
    *state = next;
}
