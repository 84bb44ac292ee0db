//! Executor trait

use crate::task::{WorkerResult, WorkerTask};
use async_trait::async_trait;
use conductor_foundation::Result;
use std::sync::Arc;

/// Receives incremental output chunks while a worker runs
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Executor trait - implement to add new execution backends
///
/// Worker-level failures (non-zero exit, timeout, garbled output) come back
/// as an `Ok` result with a failed status. `Err` is reserved for problems
/// the executor itself could not handle.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a worker task
    async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult>;

    /// Cancel a running worker; `false` if it was not running here
    async fn cancel(&self, worker_id: &str) -> Result<bool>;

    /// Check if the executor is available
    fn is_available(&self) -> bool;

    /// Get executor name
    fn name(&self) -> &'static str;
}
