use crate::error::TaskError;
use std::fmt;
use tracing::error;

/// Executes the tasks of a [`FairScheduler`](crate::FairScheduler).
///
/// Called from worker threads (and from the terminating thread while
/// remaining tasks drain), never concurrently for the same owner.
pub trait TaskHandler<K, T>: Send + Sync + 'static {
    fn execute(&self, owner: &K, task: T) -> Result<(), TaskError>;

    /// Called with the error of a failed or panicked task. The worker keeps
    /// running and the owner's later tasks are unaffected.
    fn exception_caught(&self, owner: &K, error: &TaskError)
    where
        K: fmt::Debug,
    {
        error!(?owner, %error, "task failed");
    }
}

/// Boxed closure scheduled as-is, for serializing arbitrary work per owner
/// (a connection, a session).
pub type Job = Box<dyn FnOnce() -> Result<(), TaskError> + Send>;

/// Handler running [`Job`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobHandler;

impl<K: fmt::Debug> TaskHandler<K, Job> for JobHandler {
    fn execute(&self, _owner: &K, job: Job) -> Result<(), TaskError> {
        job()
    }
}
