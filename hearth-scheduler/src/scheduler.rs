use crate::error::{SchedulerError, SchedulerResult, TaskError};
use crate::handler::TaskHandler;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Owner keys: anything hashable that identifies a serialization domain.
pub trait OwnerKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static> OwnerKey for K {}

/// Tuning of a [`FairScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads; at least one.
    pub threads: usize,
    /// An owner with no queued work is forgotten after this long.
    pub owner_idle_timeout: Duration,
    /// Period of the monitor thread.
    pub monitor_interval: Duration,
    /// A worker busy on one task longer than this is reported as blocked.
    pub block_threshold: Duration,
    /// Backlog size above which the monitor warns.
    pub overflow_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(4, |n| n.get()),
            owner_idle_timeout: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(1),
            block_threshold: Duration::from_secs(10),
            overflow_threshold: 10_000,
        }
    }
}

/// Lifecycle of a [`FairScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Accepting (queuing) work, no workers yet.
    New,
    Running,
    /// Rejecting work, workers stopping.
    Terminating,
    Terminated,
}

/// Counters exposed by [`FairScheduler::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
    pub owners: usize,
    pub evicted_owners: u64,
}

struct OwnerState<T> {
    tasks: VecDeque<T>,
    /// In the ready queue or being run by a worker.
    scheduled: bool,
    last_active: Instant,
}

struct OwnerQueue<K, T> {
    owner: K,
    state: Mutex<OwnerState<T>>,
}

impl<K, T> OwnerQueue<K, T> {
    fn new(owner: K) -> Self {
        Self {
            owner,
            state: Mutex::new(OwnerState {
                tasks: VecDeque::new(),
                scheduled: false,
                last_active: Instant::now(),
            }),
        }
    }
}

#[derive(Default)]
struct WorkerSlot {
    busy_since: Option<Instant>,
    reported: bool,
}

struct Shared<K, T> {
    name: String,
    config: SchedulerConfig,
    handler: Arc<dyn TaskHandler<K, T>>,
    state: Mutex<SchedulerState>,
    owners: Mutex<HashMap<K, Arc<OwnerQueue<K, T>>>>,
    ready: Mutex<VecDeque<Arc<OwnerQueue<K, T>>>>,
    ready_signal: Condvar,
    stop: Mutex<bool>,
    stop_signal: Condvar,
    workers: Mutex<Vec<WorkerSlot>>,
    pending: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

/// Thread pool that serializes work per owner while sharing workers fairly
/// between owners.
///
/// Each owner has a FIFO queue. An owner with queued work sits once in a
/// global ready queue; a worker takes the next owner, runs exactly one of its
/// tasks, then re-appends the owner if it still has work. An owner with one
/// task therefore never waits behind more than one task of any other owner.
pub struct FairScheduler<K, T> {
    shared: Arc<Shared<K, T>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<K: OwnerKey, T: Send + 'static> FairScheduler<K, T> {
    pub fn new(name: impl Into<String>, config: SchedulerConfig, handler: impl TaskHandler<K, T>) -> Self {
        Self::with_handler(name, config, Arc::new(handler))
    }

    /// Same as [`new`](Self::new) with a shared handler.
    pub fn with_handler(name: impl Into<String>, config: SchedulerConfig, handler: Arc<dyn TaskHandler<K, T>>) -> Self {
        let config = SchedulerConfig {
            threads: config.threads.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                handler,
                state: Mutex::new(SchedulerState::New),
                owners: Mutex::new(HashMap::new()),
                ready: Mutex::new(VecDeque::new()),
                ready_signal: Condvar::new(),
                stop: Mutex::new(false),
                stop_signal: Condvar::new(),
                workers: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock()
    }

    /// Spawns the workers and the monitor thread.
    pub fn start(&self) -> SchedulerResult<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                SchedulerState::New => *state = SchedulerState::Running,
                SchedulerState::Running => return Err(SchedulerError::AlreadyStarted(self.shared.name.clone())),
                SchedulerState::Terminating | SchedulerState::Terminated => {
                    return Err(SchedulerError::Terminated(self.shared.name.clone()));
                }
            }
        }

        let count = self.shared.config.threads;
        *self.shared.workers.lock() = (0..count).map(|_| WorkerSlot::default()).collect();

        let mut threads = self.threads.lock();
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            threads.push(self.spawn(format!("{}-{index}", self.shared.name), move || shared.work(index))?);
        }
        let shared = Arc::clone(&self.shared);
        threads.push(self.spawn(format!("{}-monitor", self.shared.name), move || shared.monitor())?);

        info!(scheduler = %self.shared.name, threads = count, "scheduler started");
        Ok(())
    }

    fn spawn(&self, thread_name: String, body: impl FnOnce() + Send + 'static) -> SchedulerResult<JoinHandle<()>> {
        thread::Builder::new()
            .name(thread_name)
            .spawn(body)
            .map_err(|source| SchedulerError::Spawn {
                name: self.shared.name.clone(),
                source,
            })
    }

    /// Appends `task` to `owner`'s queue. Accepted before [`start`](Self::start)
    /// (it runs once workers exist); rejected once terminating.
    pub fn add(&self, owner: K, task: T) -> SchedulerResult<()> {
        // `terminate` flips the state under `owners` too, so an accepted task
        // is queued before the final drain.
        let mut owners = self.shared.owners.lock();
        if matches!(
            *self.shared.state.lock(),
            SchedulerState::Terminating | SchedulerState::Terminated
        ) {
            return Err(SchedulerError::Terminated(self.shared.name.clone()));
        }
        let queue = Arc::clone(
            owners
                .entry(owner.clone())
                .or_insert_with(|| Arc::new(OwnerQueue::new(owner))),
        );
        let mut state = queue.state.lock();
        state.tasks.push_back(task);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        if !state.scheduled {
            state.scheduled = true;
            self.shared.ready.lock().push_back(Arc::clone(&queue));
            self.shared.ready_signal.notify_one();
        }
        Ok(())
    }

    /// Number of queued tasks, not counting the ones running right now.
    pub fn estimated_task_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.estimated_task_count(),
            owners: self.shared.owners.lock().len(),
            evicted_owners: self.shared.evicted.load(Ordering::Relaxed),
        }
    }

    /// Forgets owners idle longer than the configured timeout. Also run
    /// periodically by the monitor thread.
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle()
    }

    /// Stops the scheduler.
    ///
    /// New work is rejected, workers finish their current task and are
    /// joined, then the remaining tasks are either dropped
    /// (`discard_remaining`) or run to completion on the calling thread.
    /// Returns how many remaining tasks were dropped or run. Calling it again
    /// is a no-op returning 0.
    pub fn terminate(&self, discard_remaining: bool) -> usize {
        {
            let _owners = self.shared.owners.lock();
            let mut state = self.shared.state.lock();
            if matches!(*state, SchedulerState::Terminating | SchedulerState::Terminated) {
                return 0;
            }
            *state = SchedulerState::Terminating;
        }
        info!(scheduler = %self.shared.name, discard_remaining, "scheduler terminating");

        *self.shared.stop.lock() = true;
        {
            // Taking the lock orders the wakeup after any worker's empty-queue check.
            let _ready = self.shared.ready.lock();
            self.shared.ready_signal.notify_all();
        }
        self.shared.stop_signal.notify_all();

        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                warn!(scheduler = %self.shared.name, "scheduler thread panicked");
            }
        }

        let remaining = if discard_remaining {
            self.shared.discard_remaining()
        } else {
            self.shared.drain_remaining()
        };

        *self.shared.state.lock() = SchedulerState::Terminated;
        info!(scheduler = %self.shared.name, remaining, "scheduler terminated");
        remaining
    }
}

impl<K: OwnerKey, T: Send + 'static> Shared<K, T> {
    fn stopping(&self) -> bool {
        *self.stop.lock()
    }

    /// Blocks until an owner is ready, or returns `None` once stopping.
    fn next_ready(&self) -> Option<Arc<OwnerQueue<K, T>>> {
        let mut ready = self.ready.lock();
        loop {
            if self.stopping() {
                return None;
            }
            if let Some(queue) = ready.pop_front() {
                return Some(queue);
            }
            self.ready_signal.wait(&mut ready);
        }
    }

    fn work(&self, index: usize) {
        debug!(scheduler = %self.name, worker = index, "worker started");
        while let Some(queue) = self.next_ready() {
            self.set_busy(index, Some(Instant::now()));
            self.run_one(&queue);
            self.set_busy(index, None);
            self.finish_turn(queue);
        }
        debug!(scheduler = %self.name, worker = index, "worker stopped");
    }

    fn set_busy(&self, index: usize, since: Option<Instant>) {
        if let Some(slot) = self.workers.lock().get_mut(index) {
            slot.busy_since = since;
            slot.reported = false;
        }
    }

    /// Runs the head task of `queue`, reporting failures and panics to the
    /// handler.
    fn run_one(&self, queue: &OwnerQueue<K, T>) {
        let Some(task) = queue.state.lock().tasks.pop_front() else {
            return;
        };
        self.pending.fetch_sub(1, Ordering::AcqRel);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.execute(&queue.owner, task)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        match outcome {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let reported = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.handler.exception_caught(&queue.owner, &error);
                }));
                if reported.is_err() {
                    warn!(scheduler = %self.name, owner = ?queue.owner, %error, "exception handler panicked");
                }
            }
        }
    }

    /// Puts `queue` back at the tail of the ready queue if it still has work.
    fn finish_turn(&self, queue: Arc<OwnerQueue<K, T>>) {
        let mut state = queue.state.lock();
        state.last_active = Instant::now();
        if state.tasks.is_empty() {
            state.scheduled = false;
        } else {
            drop(state);
            self.ready.lock().push_back(queue);
            self.ready_signal.notify_one();
        }
    }

    fn evict_idle(&self) -> usize {
        let timeout = self.config.owner_idle_timeout;
        let mut owners = self.owners.lock();
        let before = owners.len();
        owners.retain(|_, queue| {
            let state = queue.state.lock();
            state.scheduled || !state.tasks.is_empty() || state.last_active.elapsed() < timeout
        });
        let evicted = before - owners.len();
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(scheduler = %self.name, evicted, "evicted idle owners");
        }
        evicted
    }

    fn monitor(&self) {
        let mut stop = self.stop.lock();
        while !*stop {
            self.stop_signal.wait_for(&mut stop, self.config.monitor_interval);
            if *stop {
                break;
            }
            parking_lot::MutexGuard::unlocked(&mut stop, || self.inspect());
        }
    }

    /// One monitor round: idle eviction, backlog and blocked-worker checks.
    fn inspect(&self) {
        self.evict_idle();

        let pending = self.pending.load(Ordering::Acquire);
        if pending > self.config.overflow_threshold {
            warn!(
                scheduler = %self.name,
                pending,
                threshold = self.config.overflow_threshold,
                "scheduler backlog over threshold"
            );
        }

        let mut workers = self.workers.lock();
        for (index, slot) in workers.iter_mut().enumerate() {
            let Some(since) = slot.busy_since else { continue };
            let busy = since.elapsed();
            if busy > self.config.block_threshold && !slot.reported {
                slot.reported = true;
                warn!(
                    scheduler = %self.name,
                    worker = index,
                    busy_ms = busy.as_millis() as u64,
                    "worker blocked on a single task"
                );
            }
        }
    }

    fn take_ready(&self) -> Option<Arc<OwnerQueue<K, T>>> {
        self.ready.lock().pop_front()
    }

    /// Runs every remaining task on the calling thread, still one task per
    /// owner per round.
    fn drain_remaining(&self) -> usize {
        let mut ran = 0;
        while let Some(queue) = self.take_ready() {
            self.run_one(&queue);
            ran += 1;
            self.finish_turn(queue);
        }
        ran
    }

    fn discard_remaining(&self) -> usize {
        let mut dropped = 0;
        while let Some(queue) = self.take_ready() {
            let mut state = queue.state.lock();
            dropped += state.tasks.len();
            state.tasks.clear();
            state.scheduled = false;
        }
        self.pending.fetch_sub(dropped, Ordering::AcqRel);
        dropped
    }
}

impl<K, T> Drop for FairScheduler<K, T> {
    fn drop(&mut self) {
        *self.shared.stop.lock() = true;
        {
            let _ready = self.shared.ready.lock();
            self.shared.ready_signal.notify_all();
        }
        self.shared.stop_signal.notify_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<K, T> fmt::Debug for FairScheduler<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairScheduler")
            .field("name", &self.shared.name)
            .field("state", &*self.shared.state.lock())
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
