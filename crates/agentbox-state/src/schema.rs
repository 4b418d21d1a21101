//! Task record schema.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{IllegalTransition, TaskStatus};

/// Free-form task metadata. Caller-supplied until the sandbox policy engine
/// augments it, after which the engine owns its `sandbox` and `runtime` keys.
pub type TaskMetadata = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskId(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority. Higher variants are claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<TaskMetadata>,
}

/// Editable fields of an existing task. `None` leaves a field unchanged;
/// `metadata` is merged key by key over the stored metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub priority: Option<TaskPriority>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub metadata: Option<TaskMetadata>,
}

/// Full task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Original, unvalidated command text. Never rewritten.
    pub command: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// The task is not eligible for execution before this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub task_metadata: TaskMetadata,

    /// Percentage, 0..=100.
    pub progress: Option<u8>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    /// Whole seconds between `started_at` and `completed_at`.
    pub duration: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task from already-validated metadata.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        priority: TaskPriority,
        task_metadata: TaskMetadata,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            command: command.into(),
            status: TaskStatus::Pending,
            priority,
            scheduled_at,
            task_metadata,
            progress: None,
            output: None,
            error: None,
            exit_code: None,
            duration: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether a scheduler may claim this task at `now`.
    ///
    /// Eligible tasks are `Pending`, or `Running` without `started_at`
    /// (released by a confirm/start action), whose `scheduled_at` is unset
    /// or has elapsed.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        let status_ok = match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Running => self.started_at.is_none(),
            _ => false,
        };
        status_ok && self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Claim order: priority descending, then oldest first. The id breaks
    /// exact ties so the order is total.
    pub fn claim_order(a: &Task, b: &Task) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(
        &mut self,
        next: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.status.check_transition(next)?;
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Append one line to `output`.
    pub fn append_output(&mut self, line: &str) {
        let output = self.output.get_or_insert_with(String::new);
        output.push_str(line);
        if !line.ends_with('\n') {
            output.push('\n');
        }
    }

    /// Whole seconds elapsed since `started_at`, if the task was started.
    pub fn elapsed_secs(&self, until: DateTime<Utc>) -> Option<i64> {
        self.started_at
            .map(|started| (until - started).num_seconds().max(0))
    }

    /// Reset everything an execution attempt writes.
    pub fn clear_telemetry(&mut self) {
        self.progress = None;
        self.output = None;
        self.error = None;
        self.exit_code = None;
        self.duration = None;
        self.started_at = None;
        self.completed_at = None;
    }
}
