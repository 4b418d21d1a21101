//! TaskService: task creation, editing and removal, and the user actions
//! (start, cancel, confirm, retry) that share the scheduler's transition
//! table.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use agentbox_state::{
    NewTask, StorageError, Task, TaskId, TaskStatus, TaskStore, TaskUpdate,
};

use crate::obs;
use crate::runtime::{clear_runtime, mark_confirmed, RUNTIME_KEY};
use crate::sandbox::{SandboxError, SandboxPolicyEngine};

/// A user-requested status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
    Confirm,
    Retry,
}

impl TaskAction {
    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::Start => "start",
            TaskAction::Cancel { .. } => "cancel",
            TaskAction::Confirm => "confirm",
            TaskAction::Retry => "retry",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskActionError {
    #[error("Cannot {action} task in {status} status")]
    InvalidAction {
        action: &'static str,
        status: TaskStatus,
    },

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of [`TaskService::bulk_apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkActionReport {
    pub successful: Vec<TaskId>,
    pub failed: Vec<BulkFailure>,
    pub total_processed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub task_id: TaskId,
    pub error: String,
}

/// Aggregate counts over every stored task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub waiting_confirmation: usize,
    /// Completed / total × 100, two decimals. Zero when there are no tasks.
    pub success_rate: f64,
    /// Mean `duration` of tasks that recorded one.
    pub average_duration: Option<f64>,
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    engine: Arc<SandboxPolicyEngine>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, engine: Arc<SandboxPolicyEngine>) -> Self {
        Self { store, engine }
    }

    /// Validate and augment the metadata, then persist a `Pending` task.
    /// Rejected commands never reach the store.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskActionError> {
        let metadata = self
            .engine
            .ensure_sandbox_metadata(&new_task.command, new_task.metadata.as_ref())?;
        let task = Task::new(
            new_task.name,
            new_task.command,
            new_task.priority,
            metadata,
            new_task.scheduled_at,
            Utc::now(),
        );
        self.store.insert(task.clone()).await?;

        let agent = task.task_metadata.get("agent").and_then(|v| v.as_str());
        obs::emit_task_created(&task.id.to_string(), agent);
        Ok(task)
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<Task, TaskActionError> {
        Ok(self.store.get(task_id).await?)
    }

    /// Edit a task that is not running. Metadata is merged shallowly over
    /// the stored metadata and re-augmented, so the sandbox block cannot be
    /// switched off after creation. A `runtime` key in the update is ignored.
    pub async fn update(
        &self,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<Task, TaskActionError> {
        let mut task = self.store.get(task_id).await?;
        if task.status == TaskStatus::Running {
            return Err(TaskActionError::InvalidAction {
                action: "update",
                status: task.status,
            });
        }

        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(TaskActionError::InvalidUpdate(
                    "name must not be blank".to_string(),
                ));
            }
            task.name = name.to_string();
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(scheduled_at) = update.scheduled_at {
            task.scheduled_at = Some(scheduled_at);
        }
        if let Some(changes) = update.metadata {
            let mut merged = task.task_metadata.clone();
            for (key, value) in changes {
                if key != RUNTIME_KEY {
                    merged.insert(key, value);
                }
            }
            task.task_metadata = self
                .engine
                .ensure_sandbox_metadata(&task.command, Some(&merged))?;
        }

        task.updated_at = Utc::now();
        self.store.save(&task).await?;
        obs::emit_task_action(&task.id.to_string(), "update", task.status.as_str());
        Ok(task)
    }

    /// Remove a task that is not running.
    pub async fn delete(&self, task_id: &TaskId) -> Result<(), TaskActionError> {
        let task = self.store.get(task_id).await?;
        if task.status == TaskStatus::Running {
            return Err(TaskActionError::InvalidAction {
                action: "delete",
                status: task.status,
            });
        }
        self.store.delete(task_id).await?;
        obs::emit_task_action(&task_id.to_string(), "delete", task.status.as_str());
        Ok(())
    }

    /// Remove completed, failed and cancelled tasks created more than
    /// `days_old` days ago. Returns how many were removed.
    pub async fn cleanup_old_tasks(&self, days_old: i64) -> Result<usize, TaskActionError> {
        let cutoff = Utc::now() - Duration::days(days_old);
        let removed = self.cleanup_created_before(cutoff).await?;
        obs::emit_tasks_cleaned(removed, days_old);
        Ok(removed)
    }

    /// Remove terminal tasks whose `created_at` is before `cutoff`.
    pub async fn cleanup_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, TaskActionError> {
        let mut removed = 0;
        for task in self.store.list(None).await? {
            if !task.status.is_terminal() || task.created_at >= cutoff {
                continue;
            }
            match self.store.delete(&task.id).await {
                Ok(_) => removed += 1,
                // Retried or removed since the listing.
                Err(StorageError::TaskLeased { .. } | StorageError::TaskNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    /// Apply `action` to one task and persist the result.
    pub async fn apply(&self, task_id: &TaskId, action: TaskAction) -> Result<Task, TaskActionError> {
        let mut task = self.store.get(task_id).await?;
        let now = Utc::now();
        let target = match action {
            TaskAction::Start => TaskStatus::Running,
            TaskAction::Cancel { .. } => TaskStatus::Cancelled,
            TaskAction::Confirm => TaskStatus::Running,
            TaskAction::Retry => TaskStatus::Pending,
        };
        let allowed = match action {
            // Running is also reachable from WaitingConfirmation, but only
            // through confirm.
            TaskAction::Start => task.status == TaskStatus::Pending,
            TaskAction::Confirm => task.status == TaskStatus::WaitingConfirmation,
            _ => task.status.can_transition_to(target),
        };
        if !allowed {
            return Err(TaskActionError::InvalidAction {
                action: action.name(),
                status: task.status,
            });
        }
        task.transition(target, now)
            .map_err(|err| TaskActionError::InvalidAction {
                action: action.name(),
                status: err.from,
            })?;

        match &action {
            TaskAction::Start => {}
            TaskAction::Cancel { reason } => {
                task.completed_at = Some(now);
                task.duration = task.elapsed_secs(now);
                if let Some(reason) = reason.as_deref().filter(|r| !r.trim().is_empty()) {
                    task.error = Some(format!("Task cancelled: {reason}"));
                }
            }
            TaskAction::Confirm => {
                task.started_at = None;
                mark_confirmed(&mut task.task_metadata, now);
            }
            TaskAction::Retry => {
                task.clear_telemetry();
                clear_runtime(&mut task.task_metadata);
            }
        }

        self.store.save(&task).await?;
        obs::emit_task_action(&task.id.to_string(), action.name(), task.status.as_str());
        Ok(task)
    }

    pub async fn start(&self, task_id: &TaskId) -> Result<Task, TaskActionError> {
        self.apply(task_id, TaskAction::Start).await
    }

    pub async fn cancel(
        &self,
        task_id: &TaskId,
        reason: Option<String>,
    ) -> Result<Task, TaskActionError> {
        self.apply(task_id, TaskAction::Cancel { reason }).await
    }

    pub async fn confirm(&self, task_id: &TaskId) -> Result<Task, TaskActionError> {
        self.apply(task_id, TaskAction::Confirm).await
    }

    pub async fn retry(&self, task_id: &TaskId) -> Result<Task, TaskActionError> {
        self.apply(task_id, TaskAction::Retry).await
    }

    /// Apply one action to many tasks. Individual failures are collected,
    /// never propagated.
    pub async fn bulk_apply(&self, task_ids: &[TaskId], action: TaskAction) -> BulkActionReport {
        let mut report = BulkActionReport::default();
        for task_id in task_ids {
            match self.apply(task_id, action.clone()).await {
                Ok(_) => report.successful.push(*task_id),
                Err(err) => report.failed.push(BulkFailure {
                    task_id: *task_id,
                    error: err.to_string(),
                }),
            }
            report.total_processed += 1;
        }
        report
    }

    pub async fn stats(&self) -> Result<TaskStats, TaskActionError> {
        let tasks = self.store.list(None).await?;
        Ok(compute_stats(&tasks))
    }
}

fn compute_stats(tasks: &[Task]) -> TaskStats {
    let mut stats = TaskStats {
        total: tasks.len(),
        ..TaskStats::default()
    };
    for task in tasks {
        match task.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Running => stats.running += 1,
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Cancelled => stats.cancelled += 1,
            TaskStatus::WaitingConfirmation => stats.waiting_confirmation += 1,
        }
    }

    if stats.total > 0 {
        let rate = stats.completed as f64 / stats.total as f64 * 100.0;
        stats.success_rate = (rate * 100.0).round() / 100.0;
    }

    let durations: Vec<i64> = tasks.iter().filter_map(|t| t.duration).collect();
    if !durations.is_empty() {
        stats.average_duration =
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_state::{TaskMetadata, TaskPriority};

    fn task_with(status: TaskStatus, duration: Option<i64>) -> Task {
        let mut task = Task::new(
            "t",
            "codex lint",
            TaskPriority::Medium,
            TaskMetadata::new(),
            None,
            Utc::now(),
        );
        task.status = status;
        task.duration = duration;
        task
    }

    #[test]
    fn test_stats_empty() {
        let stats = compute_stats(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_duration, None);
    }

    #[test]
    fn test_stats_rounds_success_rate() {
        let tasks = vec![
            task_with(TaskStatus::Completed, Some(4)),
            task_with(TaskStatus::Failed, Some(1)),
            task_with(TaskStatus::Pending, None),
        ];
        let stats = compute_stats(&tasks);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.success_rate, 33.33);
        assert_eq!(stats.average_duration, Some(2.5));
    }

    #[test]
    fn test_action_serde_tag() {
        let action: TaskAction =
            serde_json::from_str(r#"{"action":"cancel","reason":"superseded"}"#).unwrap();
        assert_eq!(
            action,
            TaskAction::Cancel {
                reason: Some("superseded".into())
            }
        );
        let action: TaskAction = serde_json::from_str(r#"{"action":"retry"}"#).unwrap();
        assert_eq!(action, TaskAction::Retry);
    }

    #[test]
    fn test_invalid_action_message() {
        let err = TaskActionError::InvalidAction {
            action: "retry",
            status: TaskStatus::Completed,
        };
        assert_eq!(err.to_string(), "Cannot retry task in completed status");
    }
}
