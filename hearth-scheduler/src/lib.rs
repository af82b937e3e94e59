//! Fair per-owner scheduler for Hearth.
//!
//! [`FairScheduler`] runs tasks on a fixed pool of OS threads. Tasks sharing
//! an owner run one at a time in submission order; owners take turns, one
//! task each, so a flood from one owner cannot starve the others. The entity
//! runtime keys database writes by key group, and the transport layer keys
//! inbound [`Job`]s by connection or session.

mod error;
mod handler;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult, TaskError};
pub use handler::{Job, JobHandler, TaskHandler};
pub use scheduler::{FairScheduler, OwnerKey, SchedulerConfig, SchedulerState, SchedulerStats};
