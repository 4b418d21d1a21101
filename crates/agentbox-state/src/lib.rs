//! Agentbox-State: task persistence for the Agentbox runner
//!
//! This crate owns the `Task` record, the `TaskStatus` state machine shared
//! by the scheduler and by user actions, and the `TaskStore` trait that
//! backends implement.
//!
//! ## Key Components
//!
//! - `Task` / `TaskId` / `TaskPriority`: the persisted record
//! - `TaskStatus`: legal statuses and transitions
//! - `TaskStore`: async storage seam with an atomic claim operation
//! - `MemoryTaskStore`: in-memory implementation for tests and local runs

mod error;
pub mod fakes;
mod schema;
mod status;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryTaskStore;
pub use schema::{NewTask, Task, TaskId, TaskMetadata, TaskPriority, TaskUpdate};
pub use status::{IllegalTransition, TaskStatus};
pub use storage_traits::{StorageResult, TaskStore};
