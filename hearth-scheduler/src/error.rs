//! Error types for the scheduler.

use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Lifecycle and submission errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler {0} already started")]
    AlreadyStarted(String),

    /// Submitted or started after `terminate`.
    #[error("scheduler {0} is terminated")]
    Terminated(String),

    #[error("failed to spawn thread for scheduler {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single task, reported to
/// [`TaskHandler::exception_caught`](crate::TaskHandler::exception_caught).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        TaskError::Failed(reason.to_string())
    }
}
