//! Worker Pool - bounded concurrency with a FIFO overflow queue
//!
//! Features:
//! - At most `max_concurrency` workers run at once
//! - Excess work waits in a bounded queue; a full queue fails the task
//! - Executor selection through an [`ExecutorFactory`]
//! - Worker output streamed as `worker.output` events, in order
//!
//! Worker failures never surface as `Err`: every call to
//! [`WorkerPool::execute`] resolves to a [`WorkerResult`].

use crate::events;
use crate::executor::{ExecutorFactory, OutputSink};
use crate::state::WorkerStatus;
use crate::task::{ExecutionMode, WorkerResult, WorkerTask};
use conductor_foundation::{EventBus, PoolSettings};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long the output forwarder may lag behind a finished worker
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a signalled executor gets to report how its worker ended
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent workers
    pub max_concurrency: usize,

    /// Maximum queued workers
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for WorkerPoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            queue_capacity: settings.queue_capacity,
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// A task waiting for a free slot
struct QueuedWorkerTask {
    task: WorkerTask,
    responder: oneshot::Sender<WorkerResult>,
    enqueued_at: Instant,
    cancel: CancellationToken,
}

enum Admission {
    Run(WorkerTask),
    Queued {
        position: usize,
        receiver: oneshot::Receiver<WorkerResult>,
    },
    Full,
    Cancelled,
}

#[derive(Default)]
struct PoolCore {
    active: usize,
    queue: VecDeque<QueuedWorkerTask>,
    /// Running worker id -> mode, for cancel routing
    running: HashMap<String, ExecutionMode>,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Counters {
    fn record(&self, status: WorkerStatus) {
        let counter = match status {
            WorkerStatus::Completed => &self.completed,
            WorkerStatus::Failed => &self.failed,
            WorkerStatus::Timeout => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker Pool - dispatches worker tasks to executors
#[derive(Clone)]
pub struct WorkerPool {
    core: Arc<Mutex<PoolCore>>,

    counters: Arc<Counters>,

    factory: Arc<dyn ExecutorFactory>,

    events: Arc<EventBus>,

    config: Arc<WorkerPoolConfig>,
}

/// Returns a slot to the pool when dropped, so an abandoned
/// `execute` future cannot leak capacity
struct SlotGuard {
    pool: WorkerPool,
    worker_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.core.lock().running.remove(&self.worker_id);
        self.pool.release_slot();
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        factory: Arc<dyn ExecutorFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(PoolCore::default())),
            counters: Arc::new(Counters::default()),
            factory,
            events,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run a worker task, waiting for a slot if the pool is full
    pub async fn execute(&self, task: WorkerTask) -> WorkerResult {
        self.execute_until(task, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but gives up once `cancel` fires.
    ///
    /// A token that is already cancelled keeps the task from starting; a
    /// running worker is signalled through its executor.
    pub async fn execute_until(&self, task: WorkerTask, cancel: &CancellationToken) -> WorkerResult {
        let worker_id = task.id.clone();
        let admission = {
            let mut core = self.core.lock();
            if cancel.is_cancelled() {
                Admission::Cancelled
            } else if core.active < self.config.max_concurrency {
                core.active += 1;
                core.running.insert(task.id.clone(), task.mode.clone());
                Admission::Run(task)
            } else if core.queue.len() >= self.config.queue_capacity {
                Admission::Full
            } else {
                let (responder, receiver) = oneshot::channel();
                core.queue.push_back(QueuedWorkerTask {
                    task,
                    responder,
                    enqueued_at: Instant::now(),
                    cancel: cancel.clone(),
                });
                Admission::Queued {
                    position: core.queue.len(),
                    receiver,
                }
            }
        };

        match admission {
            Admission::Run(task) => {
                let _guard = SlotGuard {
                    pool: self.clone(),
                    worker_id,
                };
                self.run_worker(&task, cancel).await
            }
            Admission::Queued { position, receiver } => {
                debug!(worker_id = %worker_id, position, "Worker queued");
                self.events
                    .publish(events::queued(&worker_id, position, self.queue_size()))
                    .await;
                match receiver.await {
                    Ok(result) => result,
                    // Responder dropped without an answer
                    Err(_) => WorkerResult::failed(worker_id, "Worker was dropped before it ran"),
                }
            }
            Admission::Full => {
                warn!(
                    worker_id = %worker_id,
                    capacity = self.config.queue_capacity,
                    "Worker queue full, rejecting task"
                );
                let error = format!(
                    "Worker queue is full ({} queued, {} running)",
                    self.config.queue_capacity, self.config.max_concurrency
                );
                let result = WorkerResult::failed(&worker_id, &error);
                self.counters.record(result.status);
                self.events.publish(events::error(&worker_id, &error)).await;
                self.events.publish(events::done(&result)).await;
                result
            }
            Admission::Cancelled => {
                debug!(worker_id = %worker_id, "Cancelled before start");
                self.cancelled(&worker_id).await
            }
        }
    }

    /// Failed "cancelled" result for a worker that never ran
    async fn cancelled(&self, worker_id: &str) -> WorkerResult {
        let result = WorkerResult::failed(worker_id, "cancelled");
        self.counters.record(result.status);
        self.events.publish(events::done(&result)).await;
        result
    }

    /// Hand a freed slot to the next queued task, or give it back
    fn release_slot(&self) {
        let next = {
            let mut core = self.core.lock();
            match core.queue.pop_front() {
                Some(entry) => {
                    core.running.insert(entry.task.id.clone(), entry.task.mode.clone());
                    Some(entry)
                }
                None => {
                    core.active = core.active.saturating_sub(1);
                    None
                }
            }
        };

        if let Some(entry) = next {
            self.dispatch(entry);
        }
    }

    /// Run a dequeued task on the slot it inherited
    fn dispatch(&self, entry: QueuedWorkerTask) {
        let QueuedWorkerTask {
            task,
            responder,
            enqueued_at,
            cancel,
        } = entry;
        debug!(
            worker_id = %task.id,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "Dispatching queued worker"
        );

        let pool = self.clone();
        tokio::spawn(async move {
            let _guard = SlotGuard {
                pool: pool.clone(),
                worker_id: task.id.clone(),
            };
            let result = if cancel.is_cancelled() {
                pool.cancelled(&task.id).await
            } else {
                pool.run_worker(&task, &cancel).await
            };
            let _ = responder.send(result);
        });
    }

    /// Execute one task on its executor and publish lifecycle events
    async fn run_worker(&self, task: &WorkerTask, cancel: &CancellationToken) -> WorkerResult {
        let started = Instant::now();
        info!(worker_id = %task.id, mode = task.mode.name(), "Worker started");
        self.events.publish(events::started(task)).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let sink: OutputSink = Arc::new(move |chunk: &str| {
            let _ = tx.send(chunk.to_string());
        });

        let bus = Arc::clone(&self.events);
        let worker_id = task.id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                bus.publish(events::output(&worker_id, &chunk)).await;
            }
        });

        let result = match self.factory.executor_for(&task.mode) {
            Err(e) => WorkerResult::failed(&task.id, e.to_string()),
            Ok(executor) if !executor.is_available() => WorkerResult::failed(
                &task.id,
                format!("{} executor is not available", executor.name()),
            ),
            Ok(executor) => {
                let run = AssertUnwindSafe(executor.execute(task, Some(sink))).catch_unwind();
                tokio::pin!(run);

                let finished = tokio::select! {
                    outcome = &mut run => Some(outcome),
                    _ = cancel.cancelled() => None,
                };
                let outcome = match finished {
                    Some(outcome) => Some(outcome),
                    None => {
                        // A signalled executor still reports how the worker ended
                        if executor.cancel(&task.id).await.unwrap_or(false) {
                            tokio::time::timeout(CANCEL_GRACE, run).await.ok()
                        } else {
                            None
                        }
                    }
                };

                match outcome {
                    Some(Ok(Ok(result))) => result,
                    Some(Ok(Err(e))) => WorkerResult::failed(&task.id, e.to_string()),
                    Some(Err(_)) => {
                        warn!(worker_id = %task.id, "Executor panicked");
                        WorkerResult::failed(&task.id, "Executor panicked")
                    }
                    None => {
                        info!(worker_id = %task.id, "Worker abandoned after cancel");
                        WorkerResult::failed(&task.id, "cancelled")
                    }
                }
            }
        };

        // The sink is gone once the executor returns; drain what it sent
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, forwarder).await.is_err() {
            debug!(worker_id = %task.id, "Output forwarder still busy, detaching");
        }

        let result = if result.duration_ms == 0 {
            result.with_duration(started.elapsed())
        } else {
            result
        };

        self.counters.record(result.status);
        if let Some(error) = &result.error {
            warn!(worker_id = %task.id, status = %result.status, "Worker failed: {}", error);
            self.events.publish(events::error(&task.id, error)).await;
        } else {
            info!(
                worker_id = %task.id,
                duration_ms = result.duration_ms,
                "Worker completed"
            );
        }
        self.events.publish(events::done(&result)).await;

        result
    }

    /// Cancel one worker: dequeue it if waiting, signal its executor if running
    pub async fn cancel(&self, worker_id: &str) -> bool {
        let (queued, mode) = {
            let mut core = self.core.lock();
            let queued = core
                .queue
                .iter()
                .position(|entry| entry.task.id == worker_id)
                .and_then(|index| core.queue.remove(index));
            let mode = core.running.get(worker_id).cloned();
            (queued, mode)
        };

        if let Some(entry) = queued {
            info!(worker_id, "Cancelled queued worker");
            let result = self.cancelled(worker_id).await;
            let _ = entry.responder.send(result);
            return true;
        }

        let Some(mode) = mode else {
            return self.broadcast_cancel(worker_id).await;
        };

        match self.factory.executor_for(&mode) {
            Ok(executor) => match executor.cancel(worker_id).await {
                Ok(cancelled) => {
                    if cancelled {
                        info!(worker_id, "Cancelled running worker");
                    }
                    cancelled
                }
                Err(e) => {
                    warn!(worker_id, "Failed to cancel worker: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!(worker_id, "No executor to cancel worker: {}", e);
                false
            }
        }
    }

    /// Ask every executor to stop a worker this pool has no record of
    async fn broadcast_cancel(&self, worker_id: &str) -> bool {
        let mut cancelled = false;
        for executor in self.factory.executors() {
            match executor.cancel(worker_id).await {
                Ok(true) => {
                    info!(worker_id, executor = executor.name(), "Cancelled untracked worker");
                    cancelled = true;
                }
                Ok(false) => {}
                Err(e) => debug!(worker_id, executor = executor.name(), "Cancel failed: {}", e),
            }
        }
        cancelled
    }

    /// Cancel several workers, returning how many were stopped
    pub async fn cancel_all(&self, worker_ids: &[String]) -> usize {
        let mut cancelled = 0;
        for id in worker_ids {
            if self.cancel(id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.core.lock().active
    }

    pub fn queue_size(&self) -> usize {
        self.core.lock().queue.len()
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.core.lock().running.keys().cloned().collect()
    }

    pub fn stats(&self) -> PoolStats {
        let core = self.core.lock();
        PoolStats {
            active: core.active,
            queued: core.queue.len(),
            max_concurrency: self.config.max_concurrency,
            queue_capacity: self.config.queue_capacity,
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use async_trait::async_trait;
    use conductor_foundation::{Error, Result};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Blocks every call until released, echoing the prompt
    struct GateExecutor {
        gate: Arc<Notify>,
        started: AtomicUsize,
        inflight: Mutex<HashSet<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for GateExecutor {
        async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.inflight.lock().insert(task.id.clone());
            self.gate.notified().await;
            self.inflight.lock().remove(&task.id);
            if task.prompt == "boom" {
                return Err(Error::Process("exit 1".into()));
            }
            if let Some(sink) = sink {
                sink("chunk-1");
                sink("chunk-2");
            }
            Ok(WorkerResult::completed(&task.id, &task.prompt, Duration::from_millis(5)))
        }

        async fn cancel(&self, worker_id: &str) -> Result<bool> {
            if !self.inflight.lock().contains(worker_id) {
                return Ok(false);
            }
            self.cancelled.lock().push(worker_id.to_string());
            self.gate.notify_waiters();
            Ok(true)
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "gate"
        }
    }

    struct SingleFactory(Arc<GateExecutor>);

    impl ExecutorFactory for SingleFactory {
        fn executor_for(&self, _mode: &ExecutionMode) -> Result<Arc<dyn Executor>> {
            Ok(self.0.clone())
        }

        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            vec![self.0.clone()]
        }
    }

    fn pool(max_concurrency: usize, queue_capacity: usize) -> (WorkerPool, Arc<Notify>) {
        let (pool, executor) = pool_with_executor(max_concurrency, queue_capacity);
        (pool, Arc::clone(&executor.gate))
    }

    fn pool_with_executor(
        max_concurrency: usize,
        queue_capacity: usize,
    ) -> (WorkerPool, Arc<GateExecutor>) {
        let executor = Arc::new(GateExecutor {
            gate: Arc::new(Notify::new()),
            started: AtomicUsize::new(0),
            inflight: Mutex::new(HashSet::new()),
            cancelled: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(
            WorkerPoolConfig {
                max_concurrency,
                queue_capacity,
            },
            Arc::new(SingleFactory(Arc::clone(&executor))),
            Arc::new(EventBus::new()),
        );
        (pool, executor)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_excess_work_is_queued_then_runs() {
        let (pool, gate) = pool(1, 5);

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("one").with_id("w-1")).await }
        });
        settle().await;
        let second = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("two").with_id("w-2")).await }
        });
        settle().await;

        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.queue_size(), 1);

        gate.notify_waiters();
        let first = first.await.unwrap();
        assert_eq!(first.output, "one");

        settle().await;
        assert_eq!(pool.queue_size(), 0);
        gate.notify_waiters();
        let second = second.await.unwrap();
        assert_eq!(second.output, "two");

        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_full_queue_fails_immediately() {
        let (pool, gate) = pool(1, 0);

        let running = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("one")).await }
        });
        settle().await;

        let rejected = pool.execute(WorkerTask::new("two").with_id("w-2")).await;
        assert_eq!(rejected.status, WorkerStatus::Failed);
        assert!(rejected.error.unwrap().contains("queue is full"));

        gate.notify_waiters();
        assert!(running.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_result() {
        let (pool, gate) = pool(2, 2);

        let handle = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("boom").with_id("w-9")).await }
        });
        settle().await;
        gate.notify_waiters();

        let result = handle.await.unwrap();
        assert_eq!(result.status, WorkerStatus::Failed);
        assert!(result.error.unwrap().contains("exit 1"));
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_output_events_in_order() {
        let (pool, gate) = pool(1, 1);
        let mut rx = pool.events().receiver();

        let handle = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("stream").with_id("w-3")).await }
        });
        settle().await;
        gate.notify_waiters();
        handle.await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.is(events::OUTPUT) {
                names.push(event.data_str("content").unwrap_or_default().to_string());
            } else {
                names.push(event.event_type.clone());
            }
        }
        assert_eq!(names, vec!["worker.started", "chunk-1", "chunk-2", "worker.done"]);
    }

    #[tokio::test]
    async fn test_cancel_queued_worker() {
        let (pool, gate) = pool(1, 3);

        let running = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("one").with_id("w-1")).await }
        });
        settle().await;
        let queued = tokio::spawn({
            let pool = pool.clone();
            async move { pool.execute(WorkerTask::new("two").with_id("w-2")).await }
        });
        settle().await;

        assert!(pool.cancel("w-2").await);
        let result = queued.await.unwrap();
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(pool.queue_size(), 0);

        assert!(!pool.cancel("w-unknown").await);
        gate.notify_waiters();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_token_keeps_worker_from_starting() {
        let (pool, executor) = pool_with_executor(2, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pool
            .execute_until(WorkerTask::new("late").with_id("w-5"), &cancel)
            .await;

        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(executor.started.load(Ordering::SeqCst), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_token_signals_running_worker() {
        let (pool, executor) = pool_with_executor(1, 1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let pool = pool.clone();
            let cancel = cancel.clone();
            async move {
                pool.execute_until(WorkerTask::new("long").with_id("w-6"), &cancel)
                    .await
            }
        });
        settle().await;
        assert_eq!(executor.started.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let result = handle.await.unwrap();

        assert_eq!(result.worker_id, "w-6");
        assert_eq!(*executor.cancelled.lock(), vec!["w-6".to_string()]);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reaches_worker_started_outside_the_pool() {
        let (pool, executor) = pool_with_executor(1, 1);

        let direct = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move {
                executor
                    .execute(&WorkerTask::new("side job").with_id("w-7"), None)
                    .await
            }
        });
        settle().await;
        assert!(pool.running_ids().is_empty());

        assert!(pool.cancel("w-7").await);
        assert!(direct.await.unwrap().is_ok());
        assert_eq!(*executor.cancelled.lock(), vec!["w-7".to_string()]);
        assert!(!pool.cancel("w-7").await);
    }
}
