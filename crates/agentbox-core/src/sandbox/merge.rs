//! Deterministic merge of caller sandbox overrides onto a profile.
//!
//! Rules, applied key by key:
//! - mapping onto mapping merges recursively;
//! - `capabilities` is a set union with the base, emitted sorted and
//!   deduplicated (a list adds every item, a scalar adds one);
//! - anything else replaces the base value;
//! - `enabled: false` at any depth is rejected.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::error::{SandboxError, SandboxResult};
use super::profile::SandboxProfile;

/// Merge `overrides` onto `base` (or onto `{enabled: true}` when there is no
/// profile). `mandatory_label` names the sandboxed agents in the error raised
/// for `enabled: false`.
pub fn merge_sandbox(
    base: Option<&SandboxProfile>,
    overrides: Option<&Value>,
    mandatory_label: &str,
) -> SandboxResult<Map<String, Value>> {
    let base = match base {
        Some(profile) => profile.to_metadata(),
        None => minimal_base(),
    };

    match overrides {
        Some(value) if is_truthy(value) => match value {
            Value::Object(overrides) => {
                reject_disabled(overrides, mandatory_label)?;
                merge_maps(&base, overrides, mandatory_label)
            }
            other => Err(SandboxError::InvalidConfig(format!(
                "sandbox overrides must be a mapping, got {other}"
            ))),
        },
        _ => Ok(base),
    }
}

/// `{enabled: true}`
pub fn minimal_base() -> Map<String, Value> {
    let mut base = Map::new();
    base.insert("enabled".into(), Value::Bool(true));
    base
}

/// Whether a metadata value counts as "supplied". Null, `false`, zero and
/// empty strings, lists or mappings do not.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Walk every mapping in `overrides`, including ones the merge would
/// insert wholesale, and reject any `enabled: false`.
fn reject_disabled(overrides: &Map<String, Value>, mandatory_label: &str) -> SandboxResult<()> {
    for (key, value) in overrides {
        if key == "enabled" && *value == Value::Bool(false) {
            return Err(SandboxError::SandboxDisabled {
                agents: mandatory_label.to_string(),
            });
        }
        match value {
            Value::Object(nested) => reject_disabled(nested, mandatory_label)?,
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        reject_disabled(nested, mandatory_label)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn merge_maps(
    base: &Map<String, Value>,
    overrides: &Map<String, Value>,
    mandatory_label: &str,
) -> SandboxResult<Map<String, Value>> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        if key == "enabled" && *value == Value::Bool(false) {
            return Err(SandboxError::SandboxDisabled {
                agents: mandatory_label.to_string(),
            });
        }

        match (merged.get(key), value) {
            (Some(Value::Object(nested)), Value::Object(nested_overrides)) => {
                let nested = merge_maps(nested, nested_overrides, mandatory_label)?;
                merged.insert(key.clone(), Value::Object(nested));
            }
            _ if key == "capabilities" => {
                // A null override leaves the base set untouched.
                if !value.is_null() {
                    let caps = union_capabilities(merged.get(key), value);
                    merged.insert(key.clone(), caps);
                }
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(merged)
}

fn union_capabilities(existing: Option<&Value>, added: &Value) -> Value {
    let mut caps: BTreeSet<String> = match existing {
        Some(Value::Array(items)) => items.iter().map(capability_name).collect(),
        _ => BTreeSet::new(),
    };
    match added {
        Value::Array(items) => caps.extend(items.iter().map(capability_name)),
        scalar => {
            caps.insert(capability_name(scalar));
        }
    }
    Value::Array(caps.into_iter().map(Value::String).collect())
}

fn capability_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
