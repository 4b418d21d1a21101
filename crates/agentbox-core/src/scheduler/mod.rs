//! TaskScheduler: a single cooperative polling loop over the task store.
//!
//! Each iteration claims at most one task and drives it through
//! policy check → gate check → start → sandbox submission → execute →
//! complete/fail. Only an idle iteration sleeps; after any processed task
//! the loop immediately looks for the next one.
//!
//! # Modules
//!
//! - [`executor`] — `WorkExecutor` / `ProgressSink` traits, `SimulatedExecutor`
//! - [`error`]    — `SchedulerError`, `ExecutionError`

pub mod error;
pub mod executor;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use agentbox_state::{Task, TaskId, TaskMetadata, TaskStatus, TaskStore};

use crate::config::{SchedulerSettings, Settings};
use crate::obs;
use crate::runtime::{is_confirmed, set_runtime_field, SANDBOX_SUBMISSION_KEY};
use crate::sandbox::merge::is_truthy;
use crate::sandbox::{AgentName, ApprovalPolicy, RuntimeDecision, SandboxPolicyEngine, Strictness};

pub use error::{ExecutionError, SchedulerError, SchedulerResult};
pub use executor::{ProgressSink, SimulatedExecutor, WorkExecutor, WorkItem};

/// How processing a claimed task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed { error: String },
    AwaitingConfirmation { reason: String },
}

/// One task handled by a scheduler iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTask {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
}

/// Long-lived scheduler with an explicit start/stop lifecycle.
///
/// At most one loop runs per instance. A loop that was asked to stop but is
/// still finishing its iteration blocks `start` until it exits.
pub struct TaskScheduler {
    worker: Arc<Worker>,
    running: Mutex<Option<LoopHandle>>,
}

/// One spawned loop. Each loop gets its own channels, so restarting can
/// never clear an older loop's stop signal.
struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    /// Flips to `true` (or closes) when the loop exits.
    done_rx: watch::Receiver<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    fn is_active(&self) -> bool {
        !self.join.is_finished() && !*self.done_rx.borrow()
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        engine: Arc<SandboxPolicyEngine>,
        executor: Arc<dyn WorkExecutor>,
        settings: &Settings,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                engine,
                executor,
                settings: settings.scheduler.clone(),
                strictness: settings.strictness,
            }),
            running: Mutex::new(None),
        }
    }

    /// A scheduler whose executor simulates work per `settings.scheduler`.
    pub fn simulated(
        store: Arc<dyn TaskStore>,
        engine: Arc<SandboxPolicyEngine>,
        settings: &Settings,
    ) -> Self {
        let executor = SimulatedExecutor::new(
            settings.scheduler.chunks,
            settings.scheduler.chunk_delay(),
        );
        Self::new(store, engine, Arc::new(executor), settings)
    }

    /// Spawn the loop on the current Tokio runtime.
    ///
    /// Returns `true` if a loop is running afterwards. A no-op while a loop
    /// is already running; returns `false` while a stopped loop is still
    /// finishing its last iteration.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = running.as_ref().filter(|h| h.is_active()) {
            if handle.is_stopping() {
                obs::emit_scheduler_start_refused();
                return false;
            }
            return true;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let join = tokio::spawn(async move {
            run_loop(worker, shutdown_rx).await;
            done_tx.send_replace(true);
        });
        *running = Some(LoopHandle {
            shutdown_tx,
            done_rx,
            join,
        });
        true
    }

    /// Signal the loop to stop and wait up to `stop_timeout` for the
    /// in-flight iteration. Returns `false` if the wait timed out; the loop
    /// still exits once that iteration finishes, and `start` refuses to
    /// spawn another until it has.
    pub async fn stop(&self) -> bool {
        let done_rx = {
            let running = self.running.lock().unwrap_or_else(|p| p.into_inner());
            match running.as_ref().filter(|h| h.is_active()) {
                Some(handle) => {
                    handle.shutdown_tx.send_replace(true);
                    handle.done_rx.clone()
                }
                None => return true,
            }
        };

        let mut done_rx = done_rx;
        // A closed channel means the loop task is gone as well.
        let wait = done_rx.wait_for(|done| *done);
        let clean = tokio::time::timeout(self.worker.settings.stop_timeout(), wait)
            .await
            .is_ok();
        obs::emit_scheduler_stopped(clean);
        clean
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map_or(false, LoopHandle::is_active)
    }

    /// Run a single iteration: claim the next eligible task and process it.
    /// Returns `None` when nothing was eligible.
    pub async fn run_once(&self) -> SchedulerResult<Option<ProcessedTask>> {
        self.worker.run_once().await
    }
}

async fn run_loop(worker: Arc<Worker>, mut shutdown_rx: watch::Receiver<bool>) {
    obs::emit_scheduler_started(worker.settings.poll_interval_ms);
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match worker.run_once().await {
            Ok(Some(_)) => {
                tokio::task::yield_now().await;
                continue;
            }
            Ok(None) => {}
            Err(err) => obs::emit_loop_error(&err),
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // The scheduler handle was dropped.
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(worker.settings.poll_interval()) => {}
        }
    }
}

struct Worker {
    store: Arc<dyn TaskStore>,
    engine: Arc<SandboxPolicyEngine>,
    executor: Arc<dyn WorkExecutor>,
    settings: SchedulerSettings,
    strictness: Strictness,
}

impl Worker {
    async fn run_once(&self) -> SchedulerResult<Option<ProcessedTask>> {
        let Some(task) = self.store.claim_next(Utc::now()).await? else {
            return Ok(None);
        };
        let task_id = task.id;
        let outcome = self
            .process(task)
            .instrument(obs::task_span(&task_id.to_string()))
            .await?;
        Ok(Some(ProcessedTask { task_id, outcome }))
    }

    async fn process(&self, mut task: Task) -> SchedulerResult<TaskOutcome> {
        let id = task.id.to_string();
        obs::emit_task_claimed(&id, &format!("{:?}", task.priority).to_lowercase());

        // Saving here would release the lease before `started_at` is set.
        if task.status != TaskStatus::Running {
            return Err(SchedulerError::UnexpectedClaim {
                task_id: id,
                status: task.status,
            });
        }

        task.task_metadata = match self
            .engine
            .ensure_sandbox_metadata(&task.command, Some(&task.task_metadata))
        {
            Ok(metadata) => metadata,
            Err(err) => {
                return self
                    .fail(task, format!("Sandbox validation failed: {err}"))
                    .await
            }
        };
        let confirmed = is_confirmed(&task.task_metadata);

        if self.strictness == Strictness::AllowListed {
            let outcome = self
                .engine
                .evaluate_runtime_policy(&task.command, Some(&task.task_metadata));
            let reason = outcome
                .reason
                .clone()
                .unwrap_or_else(|| "blocked by sandbox".to_string());
            match outcome.decision {
                RuntimeDecision::Allow => {
                    if let Some(reason) = &outcome.reason {
                        obs::emit_policy_tolerated(&id, reason);
                    }
                }
                RuntimeDecision::Gate if !confirmed => return self.gate(task, reason).await,
                RuntimeDecision::Gate => {}
                RuntimeDecision::Block => {
                    return self
                        .fail(task, format!("Blocked by runtime policy: {reason}"))
                        .await
                }
            }
        }

        if !confirmed && requires_gate(&task.task_metadata) {
            return self
                .gate(task, "approval gates pending".to_string())
                .await;
        }

        let now = Utc::now();
        task.started_at = Some(now);
        task.updated_at = now;
        task.append_output(&format!("[runner] starting at {}", now.to_rfc3339()));
        self.store.save(&task).await?;

        let agent = self
            .engine
            .effective_agent(Some(&task.task_metadata), &task.command);
        obs::emit_task_started(&id, agent.as_ref().map(AgentName::as_str));

        let mut submission = None;
        if self
            .engine
            .should_use_sandbox(Some(&task.task_metadata), &task.command)
        {
            match self
                .engine
                .build_submission(&task.command, Some(&task.task_metadata))
            {
                Ok(sub) => {
                    let profile = sub.profile_name().unwrap_or("unknown").to_string();
                    set_runtime_field(
                        &mut task.task_metadata,
                        SANDBOX_SUBMISSION_KEY,
                        sub.to_payload(),
                    );
                    task.append_output(&format!(
                        "[runner] submitted to sandbox (profile={profile})"
                    ));
                    task.updated_at = Utc::now();
                    self.store.save(&task).await?;
                    obs::emit_sandbox_submitted(&id, sub.agent.as_str(), &profile);
                    submission = Some(sub);
                }
                Err(err) => {
                    return self
                        .fail(task, format!("Sandbox validation failed: {err}"))
                        .await
                }
            }
        }

        let item = WorkItem {
            task_id: task.id,
            command: task.command.clone(),
            agent,
            submission,
        };
        let result = {
            let mut sink = StoreProgress {
                task: &mut task,
                store: self.store.as_ref(),
            };
            self.executor.execute(&item, &mut sink).await
        };

        match result {
            Ok(()) => self.complete(task).await,
            Err(err) => self.fail(task, err.to_string()).await,
        }
    }

    async fn gate(&self, mut task: Task, reason: String) -> SchedulerResult<TaskOutcome> {
        task.transition(TaskStatus::WaitingConfirmation, Utc::now())?;
        self.store.save(&task).await?;
        obs::emit_task_gated(&task.id.to_string(), &reason);
        Ok(TaskOutcome::AwaitingConfirmation { reason })
    }

    async fn complete(&self, mut task: Task) -> SchedulerResult<TaskOutcome> {
        let now = Utc::now();
        task.transition(TaskStatus::Completed, now)?;
        task.completed_at = Some(now);
        task.exit_code = Some(0);
        task.progress = Some(100);
        task.duration = task.elapsed_secs(now);
        task.append_output("[runner] completed successfully");
        self.store.save(&task).await?;
        obs::emit_task_completed(&task.id.to_string(), task.duration);
        Ok(TaskOutcome::Completed)
    }

    async fn fail(&self, mut task: Task, error: String) -> SchedulerResult<TaskOutcome> {
        let now = Utc::now();
        task.transition(TaskStatus::Failed, now)?;
        task.completed_at = Some(now);
        task.error = Some(error.clone());
        task.exit_code = Some(1);
        task.duration = task.elapsed_secs(now);
        self.store.save(&task).await?;
        obs::emit_task_failed(&task.id.to_string(), &error);
        Ok(TaskOutcome::Failed { error })
    }
}

/// `manual` / `auto_with_gates` with a non-empty `gates` entry.
fn requires_gate(metadata: &TaskMetadata) -> bool {
    ApprovalPolicy::from_metadata(Some(metadata)).allows_gating()
        && metadata.get("gates").map_or(false, is_truthy)
}

/// Persists every progress report straight to the store.
struct StoreProgress<'a> {
    task: &'a mut Task,
    store: &'a dyn TaskStore,
}

#[async_trait]
impl ProgressSink for StoreProgress<'_> {
    async fn report(&mut self, percent: u8, line: &str) -> Result<(), ExecutionError> {
        let current = self.task.progress.unwrap_or(0);
        self.task.progress = Some(current.max(percent.min(100)));
        self.task.append_output(line);
        self.task.updated_at = Utc::now();
        self.store.save(self.task).await?;
        Ok(())
    }
}
