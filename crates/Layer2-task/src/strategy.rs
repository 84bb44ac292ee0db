//! Execution strategies - how a plan's worker tasks are arranged
//!
//! - `Single` / `Sequential` - one at a time, in order, dependencies checked
//! - `Parallel` - all at once; a crashed worker becomes a failed result
//! - `Pipeline` - in order, each prompt continued with the previous output

use crate::pool::WorkerPool;
use crate::task::{WorkerResult, WorkerTask};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Separator between a pipeline prompt and the previous step's output
pub const PIPELINE_SEPARATOR: &str = "\n\n--- Previous step output ---\n";

/// Called once per worker result, as results arrive
pub type ResultCallback = Arc<dyn Fn(&WorkerResult) + Send + Sync>;

/// Arrangement of a plan's worker tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Single,
    Sequential,
    Parallel,
    Pipeline,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run `tasks` on `pool` with the given strategy.
///
/// Sequential and parallel runs return one result per task, in task order.
/// A pipeline returns results up to and including the first one that did
/// not complete.
pub async fn run_strategy(
    pool: &WorkerPool,
    strategy: ExecutionStrategy,
    tasks: Vec<WorkerTask>,
    on_result: Option<ResultCallback>,
) -> Vec<WorkerResult> {
    run_strategy_until(pool, strategy, tasks, on_result, &CancellationToken::new()).await
}

/// [`run_strategy`] that stops dispatching once `cancel` fires.
///
/// Workers not yet started when the token trips are recorded as failed
/// with the error `"cancelled"`; running ones are signalled through the pool.
pub async fn run_strategy_until(
    pool: &WorkerPool,
    strategy: ExecutionStrategy,
    tasks: Vec<WorkerTask>,
    on_result: Option<ResultCallback>,
    cancel: &CancellationToken,
) -> Vec<WorkerResult> {
    info!(strategy = %strategy, workers = tasks.len(), "Running worker tasks");

    let notify = |result: &WorkerResult| {
        if let Some(callback) = &on_result {
            callback(result);
        }
    };

    match strategy {
        ExecutionStrategy::Single | ExecutionStrategy::Sequential => {
            run_sequential(pool, tasks, cancel, notify).await
        }
        ExecutionStrategy::Parallel => run_parallel(pool, tasks, cancel, notify).await,
        ExecutionStrategy::Pipeline => run_pipeline(pool, tasks, cancel, notify).await,
    }
}

async fn run_sequential(
    pool: &WorkerPool,
    tasks: Vec<WorkerTask>,
    cancel: &CancellationToken,
    notify: impl Fn(&WorkerResult),
) -> Vec<WorkerResult> {
    let mut results = Vec::with_capacity(tasks.len());
    let mut completed: HashSet<String> = HashSet::new();

    for task in tasks {
        let unmet: Vec<String> = task
            .dependencies
            .iter()
            .filter(|dep| !completed.contains(*dep))
            .cloned()
            .collect();

        let result = if cancel.is_cancelled() {
            debug!(worker_id = %task.id, "Run cancelled, skipping worker");
            WorkerResult::failed(&task.id, "cancelled")
        } else if unmet.is_empty() {
            pool.execute_until(task, cancel).await
        } else {
            let deps = unmet.join(", ");
            warn!(worker_id = %task.id, dependencies = %deps, "Skipping worker with unmet dependencies");
            WorkerResult::failed(&task.id, format!("Dependency not satisfied: {}", deps))
        };

        if result.is_success() {
            completed.insert(result.worker_id.clone());
        }
        notify(&result);
        results.push(result);
    }

    results
}

async fn run_parallel(
    pool: &WorkerPool,
    tasks: Vec<WorkerTask>,
    cancel: &CancellationToken,
    notify: impl Fn(&WorkerResult),
) -> Vec<WorkerResult> {
    let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();

    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| {
            let pool = pool.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move { pool.execute_until(task, &cancel).await });
            async move { (index, handle.await) }
        })
        .collect();

    let mut slots: Vec<Option<WorkerResult>> = vec![None; ids.len()];
    while let Some((index, joined)) = pending.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(worker_id = %ids[index], "Worker task aborted: {}", e);
                WorkerResult::failed(&ids[index], format!("Worker task aborted: {}", e))
            }
        };
        notify(&result);
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| slot.unwrap_or_else(|| WorkerResult::failed(id, "No result")))
        .collect()
}

async fn run_pipeline(
    pool: &WorkerPool,
    tasks: Vec<WorkerTask>,
    cancel: &CancellationToken,
    notify: impl Fn(&WorkerResult),
) -> Vec<WorkerResult> {
    let mut results: Vec<WorkerResult> = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        if let Some(previous) = results.last() {
            task.prompt = continue_prompt(&task.prompt, &previous.output);
        }

        let result = if cancel.is_cancelled() {
            WorkerResult::failed(&task.id, "cancelled")
        } else {
            pool.execute_until(task, cancel).await
        };
        let stop = !result.is_success();
        notify(&result);
        results.push(result);

        if stop {
            debug!(steps = results.len(), "Pipeline stopped at a failed step");
            break;
        }
    }

    results
}

/// Append the previous step's output to a pipeline prompt
pub fn continue_prompt(prompt: &str, previous_output: &str) -> String {
    format!("{}{}{}", prompt, PIPELINE_SEPARATOR, previous_output)
}
