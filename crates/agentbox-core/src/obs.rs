//! Structured lifecycle events for tasks and the scheduler.
//!
//! Every event carries an `event = "<area>.<name>"` field so log pipelines
//! can filter on it regardless of the human-readable message.

use tracing::{error, info, warn};

/// Span tagging everything recorded while a task is processed.
///
/// Attach it with [`tracing::Instrument`] so it survives `.await` points:
///
/// ```ignore
/// process(task).instrument(task_span(&task_id)).await
/// ```
pub fn task_span(task_id: &str) -> tracing::Span {
    tracing::info_span!("agentbox.task", task_id = %task_id)
}

/// Run loop spawned.
pub fn emit_scheduler_started(poll_interval_ms: u64) {
    info!(event = "scheduler.started", poll_interval_ms = poll_interval_ms);
}

/// Stop finished; `clean` is false when the in-flight iteration outlived the timeout.
pub fn emit_scheduler_stopped(clean: bool) {
    info!(event = "scheduler.stopped", clean = clean);
}

/// `start` called while a stopped loop is still draining.
pub fn emit_scheduler_start_refused() {
    warn!(event = "scheduler.start_refused");
}

/// Loop-level failure; the loop keeps running.
pub fn emit_loop_error(error: &dyn std::fmt::Display) {
    error!(event = "scheduler.loop_error", error = %error);
}

/// Task accepted and stored as pending.
pub fn emit_task_created(task_id: &str, agent: Option<&str>) {
    info!(event = "task.created", task_id = %task_id, agent = agent.unwrap_or("-"));
}

/// Task claimed by a scheduler iteration.
pub fn emit_task_claimed(task_id: &str, priority: &str) {
    info!(event = "task.claimed", task_id = %task_id, priority = %priority);
}

/// Task parked in waiting_confirmation.
pub fn emit_task_gated(task_id: &str, reason: &str) {
    info!(event = "task.gated", task_id = %task_id, reason = %reason);
}

/// Execution began.
pub fn emit_task_started(task_id: &str, agent: Option<&str>) {
    info!(event = "task.started", task_id = %task_id, agent = agent.unwrap_or("-"));
}

/// Sandbox submission recorded on the task.
pub fn emit_sandbox_submitted(task_id: &str, agent: &str, profile: &str) {
    info!(
        event = "task.sandbox_submitted",
        task_id = %task_id,
        agent = %agent,
        profile = %profile,
    );
}

/// Task reached completed.
pub fn emit_task_completed(task_id: &str, duration_secs: Option<i64>) {
    info!(
        event = "task.completed",
        task_id = %task_id,
        duration_secs = duration_secs.unwrap_or(0),
    );
}

/// Task reached failed.
pub fn emit_task_failed(task_id: &str, error: &str) {
    warn!(event = "task.failed", task_id = %task_id, error = %error);
}

/// The command failed the runtime checks but permissive mode let it run.
pub fn emit_policy_tolerated(task_id: &str, reason: &str) {
    warn!(event = "task.policy_tolerated", task_id = %task_id, reason = %reason);
}

/// User action applied; `status` is the resulting status.
pub fn emit_task_action(task_id: &str, action: &str, status: &str) {
    info!(event = "task.action", task_id = %task_id, action = %action, status = %status);
}

/// Terminal tasks removed by retention cleanup.
pub fn emit_tasks_cleaned(removed: usize, days_old: i64) {
    info!(event = "task.cleanup", removed = removed, days_old = days_old);
}
