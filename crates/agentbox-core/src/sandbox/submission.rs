//! Payload handed to the external isolated executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agentbox_state::TaskMetadata;

use super::profile::AgentName;

/// Metadata keys owned by the engine; never forwarded as pass-through.
pub(crate) const RESERVED_KEYS: &[&str] = &["agent", "sandbox", "runtime"];

/// One execution attempt's submission for a sandboxed agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSubmission {
    pub agent: AgentName,
    /// The original command text, unmodified.
    pub command: String,
    /// Resolved sandbox block (profile, limits, network, working_dir,
    /// capabilities).
    pub sandbox: Map<String, Value>,
    /// Remaining caller metadata.
    pub metadata: TaskMetadata,
}

impl SandboxSubmission {
    pub fn profile_name(&self) -> Option<&str> {
        self.sandbox.get("profile").and_then(Value::as_str)
    }

    /// Plain mapping with keys `agent`, `command`, `sandbox` and `metadata`.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("agent".into(), Value::String(self.agent.to_string()));
        payload.insert("command".into(), Value::String(self.command.clone()));
        payload.insert("sandbox".into(), Value::Object(self.sandbox.clone()));
        payload.insert("metadata".into(), Value::Object(self.metadata.clone()));
        Value::Object(payload)
    }
}

/// Copy of `metadata` without the engine-owned keys.
pub(crate) fn pass_through(metadata: &TaskMetadata) -> TaskMetadata {
    metadata
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
