//! Error types for agentbox-state

use thiserror::Error;

use crate::status::IllegalTransition;

/// Errors that can occur in the task persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Task not found
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// A task with this id already exists
    #[error("Task already exists: {task_id}")]
    DuplicateTask { task_id: String },

    /// The task is claimed by a scheduler and cannot be removed
    #[error("Task is claimed by a scheduler: {task_id}")]
    TaskLeased { task_id: String },

    /// A save tried to move the task along an edge the state machine forbids
    #[error("Rejected update for task {task_id}: {source}")]
    IllegalTransition {
        task_id: String,
        #[source]
        source: IllegalTransition,
    },

    /// The backend could not be reached; callers may retry later
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
