//! Agentbox CLI
//!
//! The `agentbox` command exposes the sandbox policy engine and the task
//! scheduler from a terminal.
//!
//! ## Commands
//!
//! - `check`: Vet a command against the baseline or allow-listed checks
//! - `augment`: Show the metadata a task would be stored with
//! - `evaluate`: Show the runtime policy decision for a command
//! - `submission`: Show the sandbox submission payload for a command
//! - `profiles`: List the registered sandbox profiles
//! - `run`: Create tasks from a JSON file and run them until idle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

use agentbox_core::{
    SandboxPolicyEngine, Settings, Strictness, TaskOutcome, TaskScheduler, TaskService,
};
use agentbox_state::{MemoryTaskStore, NewTask, TaskMetadata, TaskStatus, TaskStore};

#[derive(Parser)]
#[command(name = "agentbox")]
#[command(author = "Agentbox Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandbox-gated task runner for coding agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON `run` results
    #[arg(long, global = true)]
    json: bool,

    /// Settings file (TOML)
    #[arg(short, long, global = true, env = "AGENTBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Vet a command without creating a task
    Check {
        /// Command text
        command: String,

        /// Check sets to apply: baseline or allow_listed
        #[arg(short, long, default_value = "baseline")]
        strictness: Strictness,
    },

    /// Print the metadata a task would be stored with
    Augment {
        /// Command text
        command: String,

        /// Task metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Print the runtime policy decision for a command
    Evaluate {
        /// Command text
        command: String,

        /// Task metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Print the sandbox submission payload for a command
    Submission {
        /// Command text
        command: String,

        /// Task metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// List registered sandbox profiles
    Profiles,

    /// Create tasks from a JSON file and run them until none are eligible
    Run {
        /// JSON array of tasks: {name, command, priority?, scheduled_at?, metadata?}
        tasks: PathBuf,

        /// Confirm gated tasks automatically and keep running
        #[arg(long)]
        auto_confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    agentbox_core::init_tracing(cli.json, level);

    let settings = load_settings(cli.config.as_deref())?;
    let engine = Arc::new(SandboxPolicyEngine::new(&settings));

    match cli.command {
        Commands::Check {
            command,
            strictness,
        } => cmd_check(&engine, &command, strictness),
        Commands::Augment { command, metadata } => {
            cmd_augment(&engine, &command, metadata.as_deref())
        }
        Commands::Evaluate { command, metadata } => {
            cmd_evaluate(&engine, &command, metadata.as_deref())
        }
        Commands::Submission { command, metadata } => {
            cmd_submission(&engine, &command, metadata.as_deref())
        }
        Commands::Profiles => cmd_profiles(&engine),
        Commands::Run {
            tasks,
            auto_confirm,
        } => cmd_run(&settings, engine, &tasks, auto_confirm, cli.json).await,
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path).context("Failed to load settings"),
        None => Ok(Settings::default()),
    }
}

/// Parse `--metadata`, which must be a JSON object.
fn parse_metadata(raw: Option<&str>) -> Result<Option<TaskMetadata>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw).context("Invalid --metadata JSON")? {
        Value::Object(map) => Ok(Some(map)),
        other => bail!("--metadata must be a JSON object, got {other}"),
    }
}

/// Vet a command
fn cmd_check(engine: &SandboxPolicyEngine, command: &str, strictness: Strictness) -> Result<()> {
    match engine.check_command(command, strictness) {
        Ok(()) => {
            println!("OK ({strictness})");
            Ok(())
        }
        Err(err) => bail!("Rejected ({strictness}): {err}"),
    }
}

/// Print augmented metadata
fn cmd_augment(engine: &SandboxPolicyEngine, command: &str, metadata: Option<&str>) -> Result<()> {
    let metadata = parse_metadata(metadata)?;
    let augmented = engine.ensure_sandbox_metadata(command, metadata.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&augmented)?);
    Ok(())
}

/// Print the runtime decision
fn cmd_evaluate(engine: &SandboxPolicyEngine, command: &str, metadata: Option<&str>) -> Result<()> {
    let metadata = parse_metadata(metadata)?;
    let outcome = engine.evaluate_runtime_policy(command, metadata.as_ref());
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Print the submission payload
fn cmd_submission(
    engine: &SandboxPolicyEngine,
    command: &str,
    metadata: Option<&str>,
) -> Result<()> {
    let metadata = parse_metadata(metadata)?;
    let submission = engine.build_submission(command, metadata.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&submission.to_payload())?);
    Ok(())
}

/// List profiles
fn cmd_profiles(engine: &SandboxPolicyEngine) -> Result<()> {
    let registry = engine.registry();
    if registry.is_empty() {
        println!("No sandbox profiles registered.");
        return Ok(());
    }

    for (agent, profile) in registry.iter() {
        let marker = if engine.is_mandatory(agent) { "* " } else { "  " };
        let limits = &profile.limits;
        println!(
            "{}{:<8} {:<18} cpu={} mem={}MB disk={}MB timeout={}s network={}",
            marker,
            agent,
            profile.name,
            limits.cpu,
            limits.memory_mb,
            limits.disk_mb,
            limits.timeout_seconds,
            if limits.allow_network { "allow" } else { "deny" },
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunSummary {
    name: String,
    status: TaskStatus,
    exit_code: Option<i32>,
    error: Option<String>,
}

/// Create tasks from `path` and run the scheduler until idle.
async fn cmd_run(
    settings: &Settings,
    engine: Arc<SandboxPolicyEngine>,
    path: &Path,
    auto_confirm: bool,
    json: bool,
) -> Result<()> {
    let summaries = run_tasks(settings, engine, path, auto_confirm).await?;
    println!("{}", render_summaries(&summaries, json)?);
    Ok(())
}

/// One line per task, or a pretty JSON array with `--json`.
fn render_summaries(summaries: &[RunSummary], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(summaries)?);
    }
    let lines: Vec<String> = summaries
        .iter()
        .map(|summary| match &summary.error {
            Some(error) => format!("{:<10} {} ({})", summary.status, summary.name, error),
            None => format!("{:<10} {}", summary.status, summary.name),
        })
        .collect();
    Ok(lines.join("\n"))
}

async fn run_tasks(
    settings: &Settings,
    engine: Arc<SandboxPolicyEngine>,
    path: &Path,
    auto_confirm: bool,
) -> Result<Vec<RunSummary>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let inputs: Vec<NewTask> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid task file {}", path.display()))?;

    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let service = TaskService::new(Arc::clone(&store), Arc::clone(&engine));
    let scheduler = TaskScheduler::simulated(Arc::clone(&store), engine, settings);

    let mut summaries = Vec::new();
    let mut ids = Vec::new();
    for input in inputs {
        let name = input.name.clone();
        match service.create_task(input).await {
            Ok(task) => ids.push(task.id),
            // Rejected at creation: nothing was stored.
            Err(err) => summaries.push(RunSummary {
                name,
                status: TaskStatus::Failed,
                exit_code: None,
                error: Some(err.to_string()),
            }),
        }
    }

    while let Some(processed) = scheduler.run_once().await? {
        if let TaskOutcome::AwaitingConfirmation { reason } = &processed.outcome {
            info!(task_id = %processed.task_id, reason = %reason, "task awaiting confirmation");
            if auto_confirm {
                service.confirm(&processed.task_id).await?;
            }
        }
    }

    for id in ids {
        let task = store.get(&id).await?;
        summaries.push(RunSummary {
            name: task.name,
            status: task.status,
            exit_code: task.exit_code,
            error: task.error,
        });
    }

    let stats = service.stats().await?;
    info!(
        total = stats.total,
        completed = stats.completed,
        failed = stats.failed,
        success_rate = stats.success_rate,
        "run finished"
    );
    Ok(summaries)
}
