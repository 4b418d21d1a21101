//! The `task_metadata.runtime` block: state written while a task runs.
//!
//! Keys: `sandbox_submission` (the payload handed to the executor) and
//! `confirmed_at` (set by the confirm action so the gate is not re-applied).

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use agentbox_state::TaskMetadata;

pub const RUNTIME_KEY: &str = "runtime";
pub const SANDBOX_SUBMISSION_KEY: &str = "sandbox_submission";
pub const CONFIRMED_AT_KEY: &str = "confirmed_at";

/// Set `runtime.<key>`, creating or repairing the block as needed.
pub fn set_runtime_field(metadata: &mut TaskMetadata, key: &str, value: Value) {
    let mut runtime = match metadata.remove(RUNTIME_KEY) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    runtime.insert(key.to_string(), value);
    metadata.insert(RUNTIME_KEY.to_string(), Value::Object(runtime));
}

pub fn runtime_field<'a>(metadata: &'a TaskMetadata, key: &str) -> Option<&'a Value> {
    metadata
        .get(RUNTIME_KEY)
        .and_then(Value::as_object)
        .and_then(|runtime| runtime.get(key))
}

/// Record that a user confirmed the task's gates.
pub fn mark_confirmed(metadata: &mut TaskMetadata, at: DateTime<Utc>) {
    set_runtime_field(metadata, CONFIRMED_AT_KEY, Value::String(at.to_rfc3339()));
}

pub fn is_confirmed(metadata: &TaskMetadata) -> bool {
    runtime_field(metadata, CONFIRMED_AT_KEY).map_or(false, |v| !v.is_null())
}

/// Drop everything a previous attempt recorded.
pub fn clear_runtime(metadata: &mut TaskMetadata) {
    metadata.remove(RUNTIME_KEY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_runtime_field_preserves_siblings() {
        let mut meta = TaskMetadata::new();
        set_runtime_field(&mut meta, "a", json!(1));
        set_runtime_field(&mut meta, "b", json!(2));
        assert_eq!(meta["runtime"], json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_set_runtime_field_repairs_non_object() {
        let mut meta = json!({"runtime": "garbage"}).as_object().cloned().unwrap();
        set_runtime_field(&mut meta, "a", json!(true));
        assert_eq!(meta["runtime"], json!({"a": true}));
    }

    #[test]
    fn test_confirmation_round_trip() {
        let mut meta = TaskMetadata::new();
        assert!(!is_confirmed(&meta));
        mark_confirmed(&mut meta, Utc::now());
        assert!(is_confirmed(&meta));
        clear_runtime(&mut meta);
        assert!(!is_confirmed(&meta));
    }
}
