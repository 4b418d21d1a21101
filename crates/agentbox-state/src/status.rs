//! Task status and the legal transition table.
//!
//! | From                   | To                                   |
//! |------------------------|--------------------------------------|
//! | `Pending`              | `Running`, `Cancelled`               |
//! | `Running`              | `Completed`, `Failed`, `Cancelled`, `WaitingConfirmation` |
//! | `WaitingConfirmation`  | `Running`                            |
//! | `Failed`, `Cancelled`  | `Pending` (retry)                    |
//!
//! Every writer (scheduler, user actions, storage backends) consults
//! [`TaskStatus::can_transition_to`]; there is no other source of truth.

use serde::{Deserialize, Serialize};

/// Status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and waiting to be picked up.
    #[default]
    Pending,
    /// Claimed by a scheduler, or released for execution by a user action.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a user before completion.
    Cancelled,
    /// Paused at an approval gate.
    WaitingConfirmation,
}

impl TaskStatus {
    /// All statuses, in declaration order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::WaitingConfirmation,
    ];

    /// Stable lowercase name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::WaitingConfirmation => "waiting_confirmation",
        }
    }

    /// Returns `true` if `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, WaitingConfirmation)
                | (WaitingConfirmation, Running)
                | (Pending, Cancelled)
                | (Running, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }

    /// Terminal for a single attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a retry action may move the task back to `Pending`.
    pub fn is_retryable(self) -> bool {
        self.can_transition_to(TaskStatus::Pending)
    }
}

/// A requested status change that is not an edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl TaskStatus {
    /// Check `self → next`, returning the rejected edge on failure.
    pub fn check_transition(self, next: TaskStatus) -> Result<(), IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_edges() {
        use TaskStatus::*;
        let legal = [
            (Pending, Running),
            (Running, Completed),
            (Running, Failed),
            (Running, WaitingConfirmation),
            (WaitingConfirmation, Running),
            (Pending, Cancelled),
            (Running, Cancelled),
            (Failed, Pending),
            (Cancelled, Pending),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn test_edge_count_is_closed() {
        let count = TaskStatus::ALL
            .iter()
            .flat_map(|from| TaskStatus::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(count, 9);
    }

    #[test]
    fn test_illegal_edges() {
        use TaskStatus::*;
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(WaitingConfirmation));
        assert!(!WaitingConfirmation.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::WaitingConfirmation.is_terminal());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(TaskStatus::Failed.is_retryable());
        assert!(TaskStatus::Cancelled.is_retryable());
        assert!(!TaskStatus::Completed.is_retryable());
    }

    #[test]
    fn test_check_transition_reports_edge() {
        let err = TaskStatus::Completed
            .check_transition(TaskStatus::Running)
            .unwrap_err();
        assert_eq!(err.from, TaskStatus::Completed);
        assert_eq!(err.to, TaskStatus::Running);
        assert!(err.to_string().contains("completed -> running"));
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}
