//! Error types for the sandbox module.

/// Errors produced by command vetting and sandbox policy resolution.
///
/// The `Display` text is the human-readable reason surfaced to callers and
/// written into a failed task's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("Command cannot be empty")]
    EmptyCommand,

    #[error("Command contains disallowed fragment: '{fragment}'.")]
    DisallowedFragment { fragment: String },

    /// `pattern` is kept for logs; the reason shown to users stays generic.
    #[error("Command contains potentially unsafe pattern")]
    UnsafePattern { pattern: String },

    /// Rejected by the allow-listed check set.
    #[error("{reason}")]
    PolicyViolation { reason: String },

    #[error("Sandbox execution is mandatory for {agents} agents")]
    SandboxDisabled { agents: String },

    #[error("No sandbox profile configured for agent '{agent}'")]
    MissingProfile { agent: String },

    #[error("Sandbox submission requires a sandboxed agent, got '{agent}'")]
    UnsupportedAgent { agent: String },

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
