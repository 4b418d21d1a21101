//! Runtime settings, passed explicitly to the policy engine and scheduler.
//!
//! All fields have defaults, so an empty TOML file is a valid configuration:
//!
//! ```toml
//! sandbox_enforced = true
//! approvals_enabled = true
//! allowed_root_commands = ["codex", "claude", "gemini"]
//! strictness = "baseline"
//!
//! [scheduler]
//! poll_interval_ms = 2000
//! chunk_delay_ms = 200
//! chunks = 5
//! stop_timeout_ms = 5000
//!
//! [profiles.gemini]
//! name = "gemini-standard"
//! capabilities = ["CAP_CHOWN"]
//! [profiles.gemini.limits]
//! cpu = 0.5
//! memory_mb = 256
//! disk_mb = 512
//! timeout_seconds = 600
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::validator::DEFAULT_ALLOWED_ROOTS;
use crate::sandbox::{SandboxProfile, Strictness};

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Policy and scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Restricts which agents require sandboxing. `None` means every agent
    /// with a registered profile.
    pub mandatory_agents: Option<Vec<String>>,
    pub sandbox_enforced: bool,
    pub approvals_enabled: bool,
    /// Root commands accepted by the allow-listed check.
    pub allowed_root_commands: Vec<String>,
    /// Check sets the scheduler applies before execution.
    pub strictness: Strictness,
    pub scheduler: SchedulerSettings,
    /// Extra or replacement profiles, keyed by agent name.
    pub profiles: BTreeMap<String, SandboxProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mandatory_agents: None,
            sandbox_enforced: true,
            approvals_enabled: true,
            allowed_root_commands: DEFAULT_ALLOWED_ROOTS.iter().map(|r| r.to_string()).collect(),
            strictness: Strictness::default(),
            scheduler: SchedulerSettings::default(),
            profiles: BTreeMap::new(),
        }
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Sleep between selection attempts when no task is eligible.
    pub poll_interval_ms: u64,
    /// Delay before each simulated work increment.
    pub chunk_delay_ms: u64,
    /// Number of simulated work increments.
    pub chunks: u32,
    /// Upper bound `stop()` waits for the in-flight iteration.
    pub stop_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            chunk_delay_ms: 200,
            chunks: 5,
            stop_timeout_ms: 5_000,
        }
    }
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    /// Read and parse a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.chunks == 0 || self.scheduler.chunks > 100 {
            return Err(ConfigError::Invalid(format!(
                "scheduler.chunks must be within 1..=100, got {}",
                self.scheduler.chunks
            )));
        }
        for (agent, profile) in &self.profiles {
            if agent.trim().is_empty() {
                return Err(ConfigError::Invalid("profile agent name is empty".into()));
            }
            if profile.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "profile for agent '{agent}' has no name"
                )));
            }
            if profile.limits.cpu.is_nan() || profile.limits.cpu <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "profile '{}' must have a positive cpu quota",
                    profile.name
                )));
            }
        }
        Ok(())
    }
}
