//! Agentbox Core Library
//!
//! Command vetting, mandatory sandbox profiles for coding agents, and the
//! scheduler that drives tasks through the approval-aware state machine.

pub mod config;
pub mod obs;
pub mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, SchedulerSettings, Settings};

pub use sandbox::{
    extract_root, merge_sandbox, AgentName, ApprovalPolicy, CommandCheck, CommandValidator,
    DenialKind, PolicyOutcome, ProfileRegistry, RuntimeDecision, SandboxError, SandboxLimits,
    SandboxMode, SandboxPolicyEngine, SandboxProfile, SandboxResult, SandboxSubmission,
    Strictness,
};

pub use scheduler::{
    ExecutionError, ProcessedTask, ProgressSink, SchedulerError, SchedulerResult,
    SimulatedExecutor, TaskOutcome, TaskScheduler, WorkExecutor, WorkItem,
};

pub use service::{
    BulkActionReport, BulkFailure, TaskAction, TaskActionError, TaskService, TaskStats,
};

pub use telemetry::init_tracing;
