//! User actions and statistics through TaskService.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use agentbox_core::config::Settings;
use agentbox_core::sandbox::{SandboxError, SandboxPolicyEngine};
use agentbox_core::scheduler::TaskScheduler;
use agentbox_core::service::{TaskAction, TaskActionError, TaskService};
use agentbox_state::{
    MemoryTaskStore, NewTask, StorageError, Task, TaskId, TaskMetadata, TaskPriority, TaskStatus,
    TaskStore, TaskUpdate,
};

struct Fixture {
    store: Arc<MemoryTaskStore>,
    service: TaskService,
    scheduler: TaskScheduler,
}

fn fixture() -> Fixture {
    let mut settings = Settings::default();
    settings.scheduler.chunk_delay_ms = 0;
    settings.scheduler.chunks = 2;
    let store = Arc::new(MemoryTaskStore::new());
    let dyn_store: Arc<dyn TaskStore> = store.clone();
    let engine = Arc::new(SandboxPolicyEngine::new(&settings));
    Fixture {
        service: TaskService::new(Arc::clone(&dyn_store), Arc::clone(&engine)),
        scheduler: TaskScheduler::simulated(dyn_store, engine, &settings),
        store,
    }
}

fn new_task(command: &str) -> NewTask {
    NewTask {
        name: format!("run {command}"),
        command: command.to_string(),
        priority: TaskPriority::High,
        ..NewTask::default()
    }
}

// ===========================================================================
// create_task
// ===========================================================================

#[tokio::test]
async fn create_persists_pending_task_with_sandbox() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();

    let stored = f.store.get(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.priority, TaskPriority::High);
    assert_eq!(stored.task_metadata["sandbox"]["profile"], json!("codex-standard"));
}

#[tokio::test]
async fn create_rejects_unsafe_command_without_persisting() {
    let f = fixture();
    let err = f
        .service
        .create_task(new_task("codex lint; rm -rf /"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TaskActionError::Sandbox(SandboxError::DisallowedFragment { .. })
    ));
    assert!(f.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_rejects_disabled_sandbox() {
    let f = fixture();
    let mut input = new_task("claude review");
    input.metadata = json!({"sandbox": {"enabled": false}}).as_object().cloned();

    let err = f.service.create_task(input).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Sandbox execution is mandatory for codex/claude agents"
    );
}

// ===========================================================================
// start / cancel
// ===========================================================================

#[tokio::test]
async fn start_releases_pending_task_to_scheduler() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();

    let started = f.service.start(&task.id).await.unwrap();
    assert_eq!(started.status, TaskStatus::Running);
    assert!(started.started_at.is_none());

    f.scheduler.run_once().await.unwrap().unwrap();
    assert_eq!(
        f.store.get(&task.id).await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn start_rejected_outside_pending() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.service.start(&task.id).await.unwrap();

    let err = f.service.start(&task.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot start task in running status");
}

#[tokio::test]
async fn cancel_pending_records_reason() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();

    let cancelled = f
        .service
        .cancel(&task.id, Some("superseded by #42".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert_eq!(
        cancelled.error.as_deref(),
        Some("Task cancelled: superseded by #42")
    );

    // Cancelled tasks are never claimed.
    assert!(f.scheduler.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_without_reason_leaves_error_empty() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    let cancelled = f.service.cancel(&task.id, None).await.unwrap();
    assert!(cancelled.error.is_none());
}

#[tokio::test]
async fn cancel_completed_task_is_rejected() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.scheduler.run_once().await.unwrap().unwrap();

    let err = f.service.cancel(&task.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        TaskActionError::InvalidAction {
            action: "cancel",
            status: TaskStatus::Completed,
        }
    ));
}

#[tokio::test]
async fn cancel_waiting_task_is_rejected() {
    let f = fixture();
    let mut input = new_task("codex deploy");
    input.metadata = json!({"approval_policy": "manual", "gates": ["qa"]})
        .as_object()
        .cloned();
    let task = f.service.create_task(input).await.unwrap();
    f.scheduler.run_once().await.unwrap().unwrap();

    let err = f.service.cancel(&task.id, None).await.unwrap_err();
    assert!(matches!(err, TaskActionError::InvalidAction { .. }));
}

// ===========================================================================
// confirm
// ===========================================================================

#[tokio::test]
async fn confirm_requires_waiting_status() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();

    let err = f.service.confirm(&task.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot confirm task in pending status");
}

#[tokio::test]
async fn confirm_stamps_runtime_block() {
    let f = fixture();
    let mut input = new_task("codex deploy");
    input.metadata = json!({"approval_policy": "auto_with_gates", "gates": ["qa"]})
        .as_object()
        .cloned();
    let task = f.service.create_task(input).await.unwrap();
    f.scheduler.run_once().await.unwrap().unwrap();

    let confirmed = f.service.confirm(&task.id).await.unwrap();
    assert!(confirmed.task_metadata["runtime"]["confirmed_at"].is_string());
}

// ===========================================================================
// retry
// ===========================================================================

#[tokio::test]
async fn retry_clears_telemetry_and_runtime() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.service.cancel(&task.id, Some("later".into())).await.unwrap();

    let retried = f.service.retry(&task.id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert!(retried.error.is_none());
    assert!(retried.completed_at.is_none());
    assert!(retried.output.is_none());
    assert!(retried.task_metadata.get("runtime").is_none());
    // The resolved sandbox block survives a retry.
    assert_eq!(retried.task_metadata["sandbox"]["profile"], json!("codex-standard"));

    f.scheduler.run_once().await.unwrap().unwrap();
    let done = f.store.get(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, Some(100));
}

#[tokio::test]
async fn retry_completed_task_is_rejected() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.scheduler.run_once().await.unwrap().unwrap();

    let err = f.service.retry(&task.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot retry task in completed status");
}

#[tokio::test]
async fn action_on_missing_task_is_storage_error() {
    let f = fixture();
    let err = f.service.start(&TaskId::new()).await.unwrap_err();
    assert!(matches!(err, TaskActionError::Storage(_)));
}

// ===========================================================================
// update / delete / cleanup
// ===========================================================================

#[tokio::test]
async fn update_edits_fields_and_merges_metadata() {
    let f = fixture();
    let mut input = new_task("codex lint");
    input.metadata = json!({"ticket": "OPS-1", "owner": "ci"}).as_object().cloned();
    let task = f.service.create_task(input).await.unwrap();
    let later = Utc::now() + Duration::hours(1);

    let updated = f
        .service
        .update(
            &task.id,
            TaskUpdate {
                name: Some("  nightly lint ".into()),
                priority: Some(TaskPriority::Urgent),
                scheduled_at: Some(later),
                metadata: json!({"ticket": "OPS-2", "sandbox": {"limits": {"cpu": 2}}})
                    .as_object()
                    .cloned(),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "nightly lint");
    assert_eq!(updated.priority, TaskPriority::Urgent);
    assert_eq!(updated.scheduled_at, Some(later));
    assert_eq!(updated.task_metadata["ticket"], json!("OPS-2"));
    assert_eq!(updated.task_metadata["owner"], json!("ci"));
    // The replaced sandbox block is re-resolved against the profile.
    assert_eq!(updated.task_metadata["sandbox"]["limits"]["cpu"], json!(2));
    assert_eq!(updated.task_metadata["sandbox"]["limits"]["memory_mb"], json!(512));
    assert_eq!(updated.task_metadata["sandbox"]["profile"], json!("codex-standard"));
    assert_eq!(f.store.get(&task.id).await.unwrap(), updated);
}

#[tokio::test]
async fn update_cannot_disable_sandbox() {
    let f = fixture();
    let task = f.service.create_task(new_task("claude review")).await.unwrap();

    let err = f
        .service
        .update(
            &task.id,
            TaskUpdate {
                metadata: json!({"sandbox": {"enabled": false}}).as_object().cloned(),
                ..TaskUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TaskActionError::Sandbox(SandboxError::SandboxDisabled { .. })
    ));

    let stored = f.store.get(&task.id).await.unwrap();
    assert_eq!(stored.task_metadata["sandbox"]["enabled"], json!(true));
}

#[tokio::test]
async fn update_ignores_runtime_and_rejects_blank_name() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();

    let updated = f
        .service
        .update(
            &task.id,
            TaskUpdate {
                metadata: json!({"runtime": {"confirmed_at": "2020-01-01T00:00:00Z"}})
                    .as_object()
                    .cloned(),
                ..TaskUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.task_metadata.get("runtime").is_none());

    let err = f
        .service
        .update(
            &task.id,
            TaskUpdate {
                name: Some("   ".into()),
                ..TaskUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TaskActionError::InvalidUpdate(_)));
}

#[tokio::test]
async fn update_and_delete_rejected_while_running() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.service.start(&task.id).await.unwrap();

    let err = f
        .service
        .update(&task.id, TaskUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot update task in running status");

    let err = f.service.delete(&task.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot delete task in running status");
    assert!(f.store.get(&task.id).await.is_ok());
}

#[tokio::test]
async fn delete_removes_task() {
    let f = fixture();
    let task = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.service.cancel(&task.id, None).await.unwrap();

    f.service.delete(&task.id).await.unwrap();
    assert!(matches!(
        f.store.get(&task.id).await.unwrap_err(),
        StorageError::TaskNotFound { .. }
    ));
    assert!(matches!(
        f.service.delete(&task.id).await.unwrap_err(),
        TaskActionError::Storage(StorageError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_tasks() {
    let f = fixture();
    let old = Utc::now() - Duration::days(40);
    let recent = Utc::now() - Duration::days(2);
    let stored = |name: &str, status: TaskStatus, created_at: DateTime<Utc>| {
        let mut task = Task::new(
            name,
            "codex lint",
            TaskPriority::Medium,
            TaskMetadata::new(),
            None,
            created_at,
        );
        task.status = status;
        task
    };

    let mut kept = Vec::new();
    for (name, status, created_at, removable) in [
        ("old-completed", TaskStatus::Completed, old, true),
        ("old-failed", TaskStatus::Failed, old, true),
        ("old-cancelled", TaskStatus::Cancelled, old, true),
        ("old-pending", TaskStatus::Pending, old, false),
        ("old-waiting", TaskStatus::WaitingConfirmation, old, false),
        ("recent-completed", TaskStatus::Completed, recent, false),
    ] {
        let id = f.store.insert(stored(name, status, created_at)).await.unwrap();
        if !removable {
            kept.push(id);
        }
    }

    let removed = f.service.cleanup_old_tasks(30).await.unwrap();
    assert_eq!(removed, 3);

    let mut remaining: Vec<TaskId> = f
        .store
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    remaining.sort();
    kept.sort();
    assert_eq!(remaining, kept);
    assert_eq!(f.service.cleanup_old_tasks(30).await.unwrap(), 0);
}

// ===========================================================================
// bulk_apply / stats
// ===========================================================================

#[tokio::test]
async fn bulk_cancel_reports_each_task() {
    let f = fixture();
    let a = f.service.create_task(new_task("codex lint")).await.unwrap();
    let b = f.service.create_task(new_task("claude review")).await.unwrap();
    f.service.cancel(&b.id, None).await.unwrap();
    let missing = TaskId::new();

    let report = f
        .service
        .bulk_apply(
            &[a.id, b.id, missing],
            TaskAction::Cancel {
                reason: Some("freeze".into()),
            },
        )
        .await;

    assert_eq!(report.total_processed, 3);
    assert_eq!(report.successful, vec![a.id]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].task_id, b.id);
    assert_eq!(
        report.failed[0].error,
        "Cannot cancel task in cancelled status"
    );
    assert_eq!(report.failed[1].task_id, missing);
}

#[tokio::test]
async fn stats_reflect_outcomes() {
    let f = fixture();
    let done = f.service.create_task(new_task("codex lint")).await.unwrap();
    f.scheduler.run_once().await.unwrap().unwrap();
    let cancelled = f.service.create_task(new_task("codex test")).await.unwrap();
    f.service.cancel(&cancelled.id, None).await.unwrap();
    f.service.create_task(new_task("claude review")).await.unwrap();

    let stats = f.service.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.success_rate, 33.33);
    assert_eq!(
        stats.average_duration,
        f.store
            .get(&done.id)
            .await
            .unwrap()
            .duration
            .map(|d| d as f64)
    );
}
