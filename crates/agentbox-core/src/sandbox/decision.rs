//! Runtime policy decision types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentbox_state::TaskMetadata;

/// Per-task approval policy, read from `task_metadata.approval_policy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    #[default]
    Auto,
    Manual,
    AutoWithGates,
}

impl ApprovalPolicy {
    /// Read the policy from metadata. Missing, null or unrecognised values
    /// are treated as `auto`.
    pub fn from_metadata(metadata: Option<&TaskMetadata>) -> Self {
        let raw = match metadata.and_then(|m| m.get("approval_policy")) {
            Some(Value::String(s)) => s.trim().to_lowercase(),
            _ => return ApprovalPolicy::Auto,
        };
        match raw.as_str() {
            "manual" => ApprovalPolicy::Manual,
            "auto_with_gates" => ApprovalPolicy::AutoWithGates,
            _ => ApprovalPolicy::Auto,
        }
    }

    /// `manual` and `auto_with_gates` pause at gates; `auto` never does.
    pub fn allows_gating(self) -> bool {
        matches!(self, ApprovalPolicy::Manual | ApprovalPolicy::AutoWithGates)
    }
}

/// Per-task sandbox mode, read from `task_metadata.sandbox.mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    #[default]
    Strict,
    /// Any mode other than `strict`.
    Permissive,
}

impl SandboxMode {
    pub fn from_metadata(metadata: Option<&TaskMetadata>) -> Self {
        let mode = metadata
            .and_then(|m| m.get("sandbox"))
            .and_then(Value::as_object)
            .and_then(|sandbox| sandbox.get("mode"));
        match mode {
            None | Some(Value::Null) => SandboxMode::Strict,
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("strict") => {
                SandboxMode::Strict
            }
            Some(_) => SandboxMode::Permissive,
        }
    }
}

/// What the scheduler should do with a task at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeDecision {
    /// Proceed with execution.
    Allow,
    /// Pause in `WaitingConfirmation`.
    Gate,
    /// Fail the task immediately.
    Block,
}

impl RuntimeDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeDecision::Allow => "allow",
            RuntimeDecision::Gate => "gate",
            RuntimeDecision::Block => "block",
        }
    }
}

impl std::fmt::Display for RuntimeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision plus the validator's reason when the command did not pass.
///
/// An `Allow` carrying a reason means the command failed the checks but
/// the failure was tolerated (permissive mode); callers should log it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub decision: RuntimeDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyOutcome {
    pub fn allow() -> Self {
        Self {
            decision: RuntimeDecision::Allow,
            reason: None,
        }
    }

    pub fn tolerated(reason: impl Into<String>) -> Self {
        Self {
            decision: RuntimeDecision::Allow,
            reason: Some(reason.into()),
        }
    }

    pub fn gate(reason: impl Into<String>) -> Self {
        Self {
            decision: RuntimeDecision::Gate,
            reason: Some(reason.into()),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: RuntimeDecision::Block,
            reason: Some(reason.into()),
        }
    }

    /// Returns `true` when the decision is `Allow`.
    pub fn is_allowed(&self) -> bool {
        self.decision == RuntimeDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> TaskMetadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_approval_policy_parsing() {
        assert_eq!(ApprovalPolicy::from_metadata(None), ApprovalPolicy::Auto);
        let m = meta(json!({"approval_policy": " MANUAL "}));
        assert_eq!(ApprovalPolicy::from_metadata(Some(&m)), ApprovalPolicy::Manual);
        let m = meta(json!({"approval_policy": "auto_with_gates"}));
        assert!(ApprovalPolicy::from_metadata(Some(&m)).allows_gating());
        let m = meta(json!({"approval_policy": "sometimes"}));
        assert_eq!(ApprovalPolicy::from_metadata(Some(&m)), ApprovalPolicy::Auto);
    }

    #[test]
    fn test_sandbox_mode_defaults_strict() {
        assert_eq!(SandboxMode::from_metadata(None), SandboxMode::Strict);
        let m = meta(json!({"sandbox": {"enabled": true}}));
        assert_eq!(SandboxMode::from_metadata(Some(&m)), SandboxMode::Strict);
        let m = meta(json!({"sandbox": {"mode": "Strict"}}));
        assert_eq!(SandboxMode::from_metadata(Some(&m)), SandboxMode::Strict);
        let m = meta(json!({"sandbox": {"mode": "permissive"}}));
        assert_eq!(SandboxMode::from_metadata(Some(&m)), SandboxMode::Permissive);
    }

    #[test]
    fn test_outcome_constructors() {
        assert!(PolicyOutcome::allow().is_allowed());
        assert!(PolicyOutcome::tolerated("x").is_allowed());
        assert!(!PolicyOutcome::gate("x").is_allowed());
        assert_eq!(PolicyOutcome::block("x").decision, RuntimeDecision::Block);
    }
}
