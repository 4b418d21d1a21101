//! In-memory fake for the storage trait
//!
//! `MemoryTaskStore` satisfies the `TaskStore` contract, including atomic
//! claims, without any external dependencies. A single mutex guards the
//! whole table, so select-then-claim cannot interleave across schedulers
//! sharing the same store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{Task, TaskId};
use crate::status::TaskStatus;
use crate::storage_traits::*;

/// Default lease length for claimed tasks.
pub const DEFAULT_LEASE_SECS: i64 = 300;

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    /// Claimed task id -> lease expiry.
    leases: HashMap<TaskId, DateTime<Utc>>,
}

/// In-memory task store backed by a `HashMap<TaskId, Task>`.
#[derive(Debug)]
pub struct MemoryTaskStore {
    state: Mutex<StoreState>,
    lease: Duration,
    available: AtomicBool,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::with_lease(Duration::seconds(DEFAULT_LEASE_SECS))
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose claims expire after `lease`.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            lease,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage: while unavailable every call fails with
    /// `StorageError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store marked offline".into()))
        }
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: Task) -> StorageResult<TaskId> {
        self.check_available()?;
        let mut state = self.lock()?;
        if state.tasks.contains_key(&task.id) {
            return Err(StorageError::DuplicateTask {
                task_id: task.id.to_string(),
            });
        }
        let id = task.id;
        state.tasks.insert(id, task);
        Ok(id)
    }

    async fn get(&self, task_id: &TaskId) -> StorageResult<Task> {
        self.check_available()?;
        let state = self.lock()?;
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> StorageResult<Option<Task>> {
        self.check_available()?;
        let mut state = self.lock()?;
        let StoreState { tasks, leases } = &mut *state;

        leases.retain(|_, expires_at| *expires_at > now);

        let next = tasks
            .values()
            .filter(|t| t.is_claimable_at(now) && !leases.contains_key(&t.id))
            .min_by(|a, b| Task::claim_order(a, b))
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(None);
        };

        if task.status == TaskStatus::Pending {
            task.transition(TaskStatus::Running, now)
                .map_err(|source| StorageError::IllegalTransition {
                    task_id: id.to_string(),
                    source,
                })?;
        }
        leases.insert(id, now + self.lease);
        debug!(task_id = %id, "claimed task");
        Ok(Some(task.clone()))
    }

    async fn save(&self, task: &Task) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.lock()?;
        let current = state
            .tasks
            .get(&task.id)
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task.id.to_string(),
            })?;
        if current.status != task.status {
            current
                .status
                .check_transition(task.status)
                .map_err(|source| StorageError::IllegalTransition {
                    task_id: task.id.to_string(),
                    source,
                })?;
        }
        state.tasks.insert(task.id, task.clone());
        state.leases.remove(&task.id);
        Ok(())
    }

    async fn list(&self, status: Option<TaskStatus>) -> StorageResult<Vec<Task>> {
        self.check_available()?;
        let state = self.lock()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(Task::claim_order);
        Ok(tasks)
    }

    async fn delete(&self, task_id: &TaskId) -> StorageResult<Task> {
        self.check_available()?;
        let mut state = self.lock()?;
        let StoreState { tasks, leases } = &mut *state;

        let now = Utc::now();
        if leases.get(task_id).map_or(false, |expires_at| *expires_at > now) {
            return Err(StorageError::TaskLeased {
                task_id: task_id.to_string(),
            });
        }
        leases.remove(task_id);
        let task = tasks
            .remove(task_id)
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        debug!(task_id = %task_id, "deleted task");
        Ok(task)
    }
}
