//! Sandbox: command vetting and mandatory execution profiles for agents.
//!
//! Every task command is statically vetted before it is accepted or run.
//! Agents in the mandatory set are bound to a resource-bounded profile whose
//! defaults callers may extend but never disable.
//!
//! # Modules
//!
//! - [`validator`]  — `CommandValidator` (baseline denylist, allow-listed check)
//! - [`profile`]    — `AgentName`, `SandboxProfile`, `ProfileRegistry::builtin()`
//! - [`merge`]      — `merge_sandbox()` (recursive, capability union, no disabling)
//! - [`decision`]   — `RuntimeDecision` / `PolicyOutcome`, approval and sandbox modes
//! - [`engine`]     — `SandboxPolicyEngine`
//! - [`submission`] — `SandboxSubmission::to_payload()`
//! - [`error`]      — `SandboxError` / `SandboxResult`

pub mod decision;
pub mod engine;
pub mod error;
pub mod merge;
pub mod profile;
pub mod submission;
pub mod validator;

pub use decision::{ApprovalPolicy, PolicyOutcome, RuntimeDecision, SandboxMode};
pub use engine::SandboxPolicyEngine;
pub use error::{SandboxError, SandboxResult};
pub use merge::merge_sandbox;
pub use profile::{AgentName, ProfileRegistry, SandboxLimits, SandboxProfile};
pub use submission::SandboxSubmission;
pub use validator::{extract_root, CommandCheck, CommandValidator, DenialKind, Strictness};
