//! Sandbox profiles and the agent → profile registry.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DEFAULT_WORKING_DIR: &str = "/app/workspace";

fn default_working_dir() -> String {
    DEFAULT_WORKING_DIR.to_string()
}

/// A normalised agent name: trimmed, lowercased, never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentName(String);

impl AgentName {
    /// Normalise `raw`, returning `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_lowercase();
        if name.is_empty() {
            None
        } else {
            Some(AgentName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AgentName::parse(&value).ok_or_else(|| "agent name cannot be empty".to_string())
    }
}

impl From<AgentName> for String {
    fn from(name: AgentName) -> Self {
        name.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Resource limits applied inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// CPU quota in cores.
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    /// Recorded for the external executor; never enforced here.
    pub timeout_seconds: u64,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

/// Immutable, named resource profile for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    pub name: String,
    pub limits: SandboxLimits,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl SandboxProfile {
    pub fn new(name: impl Into<String>, limits: SandboxLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(caps.into_iter().map(Into::into));
        self
    }

    /// Serialisable sandbox block persisted under `task_metadata.sandbox`.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let limits = &self.limits;
        let mut meta = Map::new();
        meta.insert("enabled".into(), Value::Bool(true));
        meta.insert("profile".into(), Value::String(self.name.clone()));
        meta.insert(
            "limits".into(),
            json!({
                "cpu": limits.cpu,
                "memory_mb": limits.memory_mb,
                "disk_mb": limits.disk_mb,
                "timeout_seconds": limits.timeout_seconds,
            }),
        );
        meta.insert("network".into(), json!({ "allow": limits.allow_network }));
        meta.insert(
            "working_dir".into(),
            Value::String(limits.working_dir.clone()),
        );
        // BTreeSet iteration is already sorted and deduplicated.
        meta.insert(
            "capabilities".into(),
            Value::Array(
                self.capabilities
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        meta
    }
}

/// Immutable table of agent → default profile, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRegistry {
    profiles: Vec<(AgentName, SandboxProfile)>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    /// A registry with no profiles.
    pub fn empty() -> Self {
        Self {
            profiles: Vec::new(),
        }
    }

    /// The built-in profiles for `codex` and `claude`.
    ///
    /// | Agent  | Profile         | CPU | Memory | Disk    | Timeout | Extra caps  |
    /// |--------|-----------------|-----|--------|---------|---------|-------------|
    /// | codex  | codex-standard  | 1.0 | 512 MB | 1024 MB | 1800 s  |             |
    /// | claude | claude-standard | 1.5 | 768 MB | 1536 MB | 2400 s  | CAP_SETUID  |
    ///
    /// Both deny network, work in `/app/workspace` and carry `CAP_CHOWN` and
    /// `CAP_DAC_OVERRIDE`.
    pub fn builtin() -> Self {
        let codex = SandboxProfile::new(
            "codex-standard",
            SandboxLimits {
                cpu: 1.0,
                memory_mb: 512,
                disk_mb: 1024,
                timeout_seconds: 1800,
                allow_network: false,
                working_dir: default_working_dir(),
            },
        )
        .with_capabilities(["CAP_CHOWN", "CAP_DAC_OVERRIDE"]);

        let claude = SandboxProfile::new(
            "claude-standard",
            SandboxLimits {
                cpu: 1.5,
                memory_mb: 768,
                disk_mb: 1536,
                timeout_seconds: 2400,
                allow_network: false,
                working_dir: default_working_dir(),
            },
        )
        .with_capabilities(["CAP_CHOWN", "CAP_DAC_OVERRIDE", "CAP_SETUID"]);

        Self::empty()
            .with_profile(AgentName("codex".into()), codex)
            .with_profile(AgentName("claude".into()), claude)
    }

    /// Register `profile` for `agent`, replacing any existing entry in place.
    pub fn with_profile(mut self, agent: AgentName, profile: SandboxProfile) -> Self {
        match self.profiles.iter_mut().find(|(name, _)| *name == agent) {
            Some(entry) => entry.1 = profile,
            None => self.profiles.push((agent, profile)),
        }
        self
    }

    pub fn resolve(&self, agent: &AgentName) -> Option<&SandboxProfile> {
        self.profiles
            .iter()
            .find(|(name, _)| name == agent)
            .map(|(_, profile)| profile)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentName> {
        self.profiles.iter().map(|(name, _)| name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentName, &SandboxProfile)> {
        self.profiles.iter().map(|(name, profile)| (name, profile))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentName {
        AgentName::parse(name).unwrap()
    }

    #[test]
    fn test_agent_name_normalised() {
        assert_eq!(agent("  CoDeX ").as_str(), "codex");
        assert!(AgentName::parse("   ").is_none());
    }

    #[test]
    fn test_builtin_has_exactly_two_agents() {
        let registry = ProfileRegistry::builtin();
        let names: Vec<&str> = registry.agents().map(AgentName::as_str).collect();
        assert_eq!(names, vec!["codex", "claude"]);
        assert!(registry.resolve(&agent("gemini")).is_none());
    }

    #[test]
    fn test_codex_profile_values() {
        let registry = ProfileRegistry::builtin();
        let codex = registry.resolve(&agent("codex")).unwrap();
        assert_eq!(codex.name, "codex-standard");
        assert_eq!(codex.limits.cpu, 1.0);
        assert_eq!(codex.limits.memory_mb, 512);
        assert_eq!(codex.limits.timeout_seconds, 1800);
        assert!(!codex.limits.allow_network);
    }

    #[test]
    fn test_profile_metadata_shape() {
        let registry = ProfileRegistry::builtin();
        let meta = registry.resolve(&agent("claude")).unwrap().to_metadata();
        assert_eq!(meta["enabled"], Value::Bool(true));
        assert_eq!(meta["profile"], "claude-standard");
        assert_eq!(meta["limits"]["memory_mb"], 768);
        assert_eq!(meta["limits"]["disk_mb"], 1536);
        assert_eq!(meta["network"]["allow"], false);
        assert_eq!(meta["working_dir"], DEFAULT_WORKING_DIR);
        assert_eq!(
            meta["capabilities"],
            json!(["CAP_CHOWN", "CAP_DAC_OVERRIDE", "CAP_SETUID"])
        );
    }

    #[test]
    fn test_with_profile_replaces_in_place() {
        let custom = SandboxProfile::new(
            "codex-large",
            SandboxLimits {
                cpu: 4.0,
                memory_mb: 4096,
                disk_mb: 8192,
                timeout_seconds: 3600,
                allow_network: true,
                working_dir: "/work".into(),
            },
        );
        let registry = ProfileRegistry::builtin().with_profile(agent("codex"), custom);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve(&agent("codex")).unwrap().name,
            "codex-large"
        );
    }

    #[test]
    fn test_profile_deserialises_with_defaults() {
        let profile: SandboxProfile = serde_json::from_value(json!({
            "name": "gemini-small",
            "limits": {"cpu": 1, "memory_mb": 256, "disk_mb": 512, "timeout_seconds": 600}
        }))
        .unwrap();
        assert_eq!(profile.limits.working_dir, DEFAULT_WORKING_DIR);
        assert!(!profile.limits.allow_network);
        assert!(profile.capabilities.is_empty());
    }
}
