//! Error types for the scheduler.

use agentbox_state::{IllegalTransition, StorageError, TaskStatus};

/// Loop-level failures. Logged by the run loop, which keeps polling.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// `claim_next` handed back a task it did not move to `Running`.
    #[error("claimed task {task_id} is {status}, expected running")]
    UnexpectedClaim { task_id: String, status: TaskStatus },
}

/// A single execution attempt failed. Recorded into the task, never
/// propagated to the loop.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("progress could not be persisted: {0}")]
    Storage(#[from] StorageError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
