//! SandboxPolicyEngine: command vetting + profile resolution for tasks.

use serde_json::Value;

use agentbox_state::TaskMetadata;

use super::decision::{ApprovalPolicy, PolicyOutcome, SandboxMode};
use super::error::{SandboxError, SandboxResult};
use super::merge::{is_truthy, merge_sandbox};
use super::profile::{AgentName, ProfileRegistry};
use super::submission::{pass_through, SandboxSubmission};
use super::validator::{CommandCheck, CommandValidator, Strictness};
use crate::config::Settings;

/// Pure policy functions over `(command, metadata)`.
///
/// Built once from [`Settings`]; holds no ambient state and never mutates
/// its inputs.
#[derive(Debug, Clone)]
pub struct SandboxPolicyEngine {
    registry: ProfileRegistry,
    mandatory: Vec<AgentName>,
    validator: CommandValidator,
    sandbox_enforced: bool,
    approvals_enabled: bool,
}

impl Default for SandboxPolicyEngine {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

impl SandboxPolicyEngine {
    /// Built-in profiles plus any `[profiles.<agent>]` entries in `settings`.
    pub fn new(settings: &Settings) -> Self {
        let registry = settings
            .profiles
            .iter()
            .filter_map(|(name, profile)| AgentName::parse(name).map(|a| (a, profile.clone())))
            .fold(ProfileRegistry::builtin(), |registry, (agent, profile)| {
                registry.with_profile(agent, profile)
            });
        Self::with_registry(registry, settings)
    }

    /// Use `registry` as-is. Without a `mandatory_agents` override every
    /// registered agent is mandatory.
    pub fn with_registry(registry: ProfileRegistry, settings: &Settings) -> Self {
        let mut mandatory: Vec<AgentName> = match &settings.mandatory_agents {
            Some(names) => names.iter().filter_map(|n| AgentName::parse(n)).collect(),
            None => registry.agents().cloned().collect(),
        };
        let mut seen = std::collections::HashSet::new();
        mandatory.retain(|agent| seen.insert(agent.clone()));

        Self {
            registry,
            mandatory,
            validator: CommandValidator::new(&settings.allowed_root_commands),
            sandbox_enforced: settings.sandbox_enforced,
            approvals_enabled: settings.approvals_enabled,
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn mandatory_agents(&self) -> &[AgentName] {
        &self.mandatory
    }

    pub fn is_mandatory(&self, agent: &AgentName) -> bool {
        self.mandatory.contains(agent)
    }

    fn mandatory_label(&self) -> String {
        if self.mandatory.is_empty() {
            return "sandboxed".to_string();
        }
        self.mandatory
            .iter()
            .map(AgentName::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The explicit `metadata.agent` (normalised), else the command's first
    /// token when it names a mandatory agent.
    pub fn effective_agent(
        &self,
        metadata: Option<&TaskMetadata>,
        command: &str,
    ) -> Option<AgentName> {
        if let Some(value) = metadata.and_then(|m| m.get("agent")) {
            if is_truthy(value) {
                return match value {
                    Value::String(s) => AgentName::parse(s),
                    other => AgentName::parse(&other.to_string()),
                };
            }
        }

        let first = command.split_whitespace().next()?;
        AgentName::parse(first).filter(|agent| self.is_mandatory(agent))
    }

    /// Validate `command` and return a copy of `metadata` carrying the
    /// resolved `agent` and `sandbox` block.
    pub fn ensure_sandbox_metadata(
        &self,
        command: &str,
        metadata: Option<&TaskMetadata>,
    ) -> SandboxResult<TaskMetadata> {
        self.validator.validate(command)?;

        let mut augmented = metadata.cloned().unwrap_or_default();
        let agent = self.effective_agent(metadata, command);
        if let Some(agent) = &agent {
            augmented.insert("agent".into(), Value::String(agent.to_string()));
        }

        let overrides = augmented.get("sandbox").cloned();
        let label = self.mandatory_label();
        match agent {
            Some(agent) if self.is_mandatory(&agent) => {
                if let Some(Value::Object(block)) = &overrides {
                    if block.get("enabled") == Some(&Value::Bool(false)) {
                        return Err(SandboxError::SandboxDisabled { agents: label });
                    }
                }
                let profile =
                    self.registry
                        .resolve(&agent)
                        .ok_or_else(|| SandboxError::MissingProfile {
                            agent: agent.to_string(),
                        })?;
                let merged = merge_sandbox(Some(profile), overrides.as_ref(), &label)?;
                augmented.insert("sandbox".into(), Value::Object(merged));
            }
            _ if overrides.as_ref().map_or(false, is_truthy) => {
                let merged = merge_sandbox(None, overrides.as_ref(), &label)?;
                augmented.insert("sandbox".into(), Value::Object(merged));
            }
            _ => {}
        }

        Ok(augmented)
    }

    /// `true` iff the effective agent is mandatory.
    pub fn should_use_sandbox(&self, metadata: Option<&TaskMetadata>, command: &str) -> bool {
        self.effective_agent(metadata, command)
            .map_or(false, |agent| self.is_mandatory(&agent))
    }

    /// Decide allow / gate / block for unsupervised execution. Never fails.
    pub fn evaluate_runtime_policy(
        &self,
        command: &str,
        metadata: Option<&TaskMetadata>,
    ) -> PolicyOutcome {
        let reason = match self.validator.classify(command) {
            CommandCheck::Denied { reason, .. } => reason,
            CommandCheck::Allowed => match self.validator.validate(command) {
                Ok(()) => return PolicyOutcome::allow(),
                Err(err) => err.to_string(),
            },
        };

        if !self.approvals_enabled {
            return PolicyOutcome::block(reason);
        }

        if self.sandbox_enforced || SandboxMode::from_metadata(metadata) == SandboxMode::Strict {
            return if ApprovalPolicy::from_metadata(metadata).allows_gating() {
                PolicyOutcome::gate(reason)
            } else {
                PolicyOutcome::block(reason)
            };
        }

        PolicyOutcome::tolerated(reason)
    }

    /// Bundle agent, command, resolved sandbox block and pass-through
    /// metadata for the external executor. Only mandatory agents qualify.
    pub fn build_submission(
        &self,
        command: &str,
        metadata: Option<&TaskMetadata>,
    ) -> SandboxResult<SandboxSubmission> {
        let agent = match self.effective_agent(metadata, command) {
            Some(agent) if self.is_mandatory(&agent) => agent,
            other => {
                return Err(SandboxError::UnsupportedAgent {
                    agent: other.map_or_else(|| "none".to_string(), |a| a.to_string()),
                })
            }
        };

        let augmented = self.ensure_sandbox_metadata(command, metadata)?;
        let sandbox = augmented
            .get("sandbox")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                SandboxError::InvalidConfig("resolved metadata has no sandbox block".into())
            })?;

        Ok(SandboxSubmission {
            agent,
            command: command.to_string(),
            sandbox,
            metadata: pass_through(&augmented),
        })
    }

    /// Run the check sets selected by `strictness` against `command`.
    pub fn check_command(&self, command: &str, strictness: Strictness) -> SandboxResult<()> {
        self.validator.check(command, strictness)
    }
}
