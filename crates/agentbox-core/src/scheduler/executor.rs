//! Work executors: what the scheduler runs once a task is cleared to start.

use std::time::Duration;

use async_trait::async_trait;

use agentbox_state::TaskId;

use super::error::ExecutionError;
use crate::sandbox::{AgentName, SandboxSubmission};

/// Everything an executor needs to know about one attempt.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub command: String,
    pub agent: Option<AgentName>,
    /// Present when the agent runs in the mandatory sandbox.
    pub submission: Option<SandboxSubmission>,
}

/// Receives progress from an executor. Each report is persisted before
/// `report` returns.
#[async_trait]
pub trait ProgressSink: Send {
    /// Record `percent` (clamped to 100, never lowered) and append `line`
    /// to the task output.
    async fn report(&mut self, percent: u8, line: &str) -> Result<(), ExecutionError>;
}

/// Performs the work for a task.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(
        &self,
        item: &WorkItem,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), ExecutionError>;
}

/// Simulates work in `chunks` equal increments, sleeping `delay` before each.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    chunks: u32,
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(chunks: u32, delay: Duration) -> Self {
        Self {
            chunks: chunks.max(1),
            delay,
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }
}

#[async_trait]
impl WorkExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        _item: &WorkItem,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), ExecutionError> {
        for i in 1..=self.chunks {
            tokio::time::sleep(self.delay).await;
            let percent = chunk_percent(i, self.chunks);
            progress
                .report(percent, &format!("chunk {i}/{} done", self.chunks))
                .await?;
        }
        Ok(())
    }
}

/// Percent done after chunk `i` of `chunks`, widened so huge chunk counts
/// cannot overflow.
fn chunk_percent(i: u32, chunks: u32) -> u8 {
    let percent = u64::from(i) * 100 / u64::from(chunks.max(1));
    percent.min(100) as u8
}
