//! Storage trait definitions for Agentbox
//!
//! `TaskStore` is the only persistence seam the scheduler and the task
//! service depend on. It is async and backend-agnostic; an in-memory fake
//! lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::schema::{Task, TaskId};
use crate::status::TaskStatus;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Task persistence.
///
/// Guarantees:
/// - `claim_next` is atomic: it selects the next claimable task (see
///   [`Task::is_claimable_at`] and [`Task::claim_order`]), moves a `Pending`
///   task to `Running` without `started_at`, and leases it so that no other
///   claimer receives the same task until it is saved again or the lease
///   expires.
/// - `save` rejects any status change that is not an edge of the state
///   machine, so no writer can bypass it.
/// - `delete` never removes a task out from under an active claim.
/// - Reads return owned snapshots; mutating them has no effect until `save`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with `DuplicateTask` if the id exists.
    async fn insert(&self, task: Task) -> StorageResult<TaskId>;

    /// Retrieve a task by id.
    async fn get(&self, task_id: &TaskId) -> StorageResult<Task>;

    /// Atomically select and claim the next eligible task, if any.
    async fn claim_next(&self, now: DateTime<Utc>) -> StorageResult<Option<Task>>;

    /// Persist field updates for an existing task and release its lease.
    async fn save(&self, task: &Task) -> StorageResult<()>;

    /// List tasks, optionally filtered by status, in claim order.
    async fn list(&self, status: Option<TaskStatus>) -> StorageResult<Vec<Task>>;

    /// Remove a task and return its last stored state. Fails with
    /// `TaskLeased` while a claim on it is live.
    async fn delete(&self, task_id: &TaskId) -> StorageResult<Task>;
}
