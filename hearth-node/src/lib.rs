//! Counter workload for the Hearth node.
//!
//! Sessions submit increments as jobs on a fair scheduler keyed by session;
//! increments from different sessions hit the same counters concurrently,
//! so commits conflict and retry. After the run every successful increment
//! must be reflected exactly once in the counter totals.

use anyhow::{Context, Result};
use hearth_entity::{EntityResult, Hearth, Transaction, TxOutcome, TxScope, transaction};
use hearth_model::{Entity, EntityMeta, EntityPolicy};
use hearth_scheduler::{FairScheduler, Job, JobHandler, TaskError};
use hearth_types::KeyGroup;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// A named counter; `slot` identifies it within its key group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub group: u64,
    pub slot: u32,
    pub value: u64,
}

impl Entity for Counter {
    const TYPE_NAME: &'static str = "counter";
    const POLICY: EntityPolicy = EntityPolicy::relational();

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn key_group(&self) -> KeyGroup {
        KeyGroup::new(self.group)
    }
}

/// Adds one to counter `slot` of key group `key`.
#[derive(Debug, Clone, Copy)]
pub struct Increment {
    pub key: KeyGroup,
    pub slot: u32,
}

impl Transaction for Increment {
    fn name(&self) -> &str {
        "increment"
    }

    fn process(&mut self, tx: &mut TxScope<'_>) -> EntityResult<()> {
        let counters = tx.select_by_key::<Counter>(self.key)?;
        if let Some(mut counter) = counters.into_iter().find(|c| c.slot == self.slot) {
            counter.value += 1;
            tx.update(&counter)?;
        }
        Ok(())
    }
}

/// Shape of a workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub groups: u64,
    pub counters_per_group: u32,
    pub increments_per_group: u32,
    pub sessions: u64,
}

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub submitted: u64,
    pub succeeded: u64,
    /// Increments that gave up after exhausting their retries.
    pub failed: u64,
    /// Increments that aborted with an error.
    pub errors: u64,
    /// Extra attempts caused by conflicts.
    pub retries: u64,
    /// Sum of every counter after the run.
    pub total: u64,
}

impl WorkloadReport {
    /// True if every successful increment, and nothing else, was counted.
    pub fn is_consistent(&self) -> bool {
        self.total == self.succeeded && self.succeeded + self.failed + self.errors == self.submitted
    }
}

#[derive(Default)]
struct Tally {
    succeeded: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
}

/// Registers the entity types the node works with.
pub fn register(hearth: &Hearth) -> Result<()> {
    hearth.register::<Counter>().context("failed to register counter")?;
    Ok(())
}

/// Creates `counters_per_group` zeroed counters in every key group.
pub fn seed(hearth: &Hearth, workload: &Workload) -> Result<()> {
    for group in 0..workload.groups {
        let mut tx = transaction::from_fn("seed", |tx| {
            for slot in 0..workload.counters_per_group {
                tx.insert(&mut Counter {
                    meta: EntityMeta::new(),
                    group,
                    slot,
                    value: 0,
                })?;
            }
            Ok(())
        });
        let outcome = hearth.run(&mut tx)?;
        anyhow::ensure!(outcome.is_success(), "seeding key group {group} failed: {outcome:?}");
    }
    info!(groups = workload.groups, counters = workload.counters_per_group, "seeded counters");
    Ok(())
}

/// Sum of every counter in the workload's key groups.
pub fn total(hearth: &Hearth, workload: &Workload) -> Result<u64> {
    let mut sum = 0;
    let mut tx = transaction::from_fn("total", |tx| {
        sum = 0;
        for group in 0..workload.groups {
            sum += tx
                .select_by_key::<Counter>(KeyGroup::new(group))?
                .iter()
                .map(|c| c.value)
                .sum::<u64>();
        }
        Ok(())
    });
    hearth.run(&mut tx)?;
    Ok(sum)
}

/// Seeds the counters, runs every increment through a session-keyed
/// scheduler and reports the result.
pub fn run_workload(hearth: &Arc<Hearth>, workload: &Workload) -> Result<WorkloadReport> {
    seed(hearth, workload)?;

    let config = hearth.config();
    let sessions: FairScheduler<u64, Job> = FairScheduler::new(
        "hearth-msg",
        config.scheduler.pool(config.scheduler.message_threads),
        JobHandler,
    );
    sessions.start()?;

    let tally = Arc::new(Tally::default());
    let mut submitted = 0;
    for round in 0..workload.increments_per_group {
        for group in 0..workload.groups {
            let session = submitted % workload.sessions.max(1);
            let mut increment = Increment {
                key: KeyGroup::new(group),
                slot: round % workload.counters_per_group.max(1),
            };
            let hearth = Arc::clone(hearth);
            let tally = Arc::clone(&tally);
            let job: Job = Box::new(move || {
                let outcome = hearth.run(&mut increment).map_err(|e| {
                    tally.errors.fetch_add(1, Ordering::Relaxed);
                    TaskError::failed(e)
                })?;
                record(&tally, outcome);
                Ok(())
            });
            sessions.add(session, job)?;
            submitted += 1;
        }
    }
    debug!(submitted, sessions = workload.sessions, "increments queued");
    sessions.terminate(false);

    let report = WorkloadReport {
        submitted,
        succeeded: tally.succeeded.load(Ordering::Relaxed),
        failed: tally.failed.load(Ordering::Relaxed),
        errors: tally.errors.load(Ordering::Relaxed),
        retries: tally.retries.load(Ordering::Relaxed),
        total: total(hearth, workload)?,
    };
    info!(?report, "workload finished");
    Ok(report)
}

fn record(tally: &Tally, outcome: TxOutcome) {
    tally
        .retries
        .fetch_add(u64::from(outcome.attempts().saturating_sub(1)), Ordering::Relaxed);
    match outcome {
        TxOutcome::Succeeded { .. } => tally.succeeded.fetch_add(1, Ordering::Relaxed),
        TxOutcome::Failed { .. } => tally.failed.fetch_add(1, Ordering::Relaxed),
    };
}
