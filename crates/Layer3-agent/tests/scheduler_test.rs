//! Command scheduler end to end with scripted capabilities and an in-memory executor

use async_trait::async_trait;
use conductor_agent::events::{APPROVAL, ERROR, QUEUED, RESULT};
use conductor_agent::{
    Analysis, Analyzer, Capabilities, CommandContext, CommandScheduler, Complexity, Intent, Plan,
    Planner, ReportStatus, Reviewer, ReviewReport, SchedulerConfig, SchedulerState, SubmitOptions,
    Task,
};
use conductor_foundation::{ConductorEvent, Error, EventBus, EventListener, Result};
use conductor_task::{
    ExecutionMode, ExecutionStrategy, Executor, ExecutorFactory, OutputSink, WorkerPool,
    WorkerPoolConfig, WorkerResult, WorkerStatus, WorkerTask,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, Semaphore};

// ============================================================================
// Scripted capabilities
// ============================================================================

/// "list ..." is a simple question; anything else is code work
struct KeywordAnalyzer;

#[async_trait]
impl Analyzer for KeywordAnalyzer {
    async fn analyze(&self, command: &str, _context: &CommandContext) -> Result<Analysis> {
        if command.starts_with("list") {
            return Ok(Analysis::new(Intent::Question, Complexity::Simple, "Directory listing")
                .with_answer("src/ tests/ Cargo.toml"));
        }
        Ok(Analysis::new(Intent::Code, Complexity::Moderate, command))
    }
}

/// One worker per `;`-separated part of the command
struct SplitPlanner(ExecutionStrategy);

#[async_trait]
impl Planner for SplitPlanner {
    async fn plan(&self, analysis: &Analysis, _context: &CommandContext) -> Result<Plan> {
        let workers = analysis
            .summary
            .split(';')
            .map(str::trim)
            .enumerate()
            .map(|(i, prompt)| WorkerTask::new(prompt).with_id(format!("w-{}", i + 1)))
            .collect();
        Ok(Plan::new(self.0, workers))
    }
}

/// Asks for one retry, then accepts
#[derive(Default)]
struct RetryOnceReviewer {
    calls: AtomicUsize,
}

#[async_trait]
impl Reviewer for RetryOnceReviewer {
    async fn review(&self, results: &[WorkerResult], task: &Task) -> Result<ReviewReport> {
        let report = ReviewReport::from_results(&task.id, results);
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(report.with_retry("flaky test run"));
        }
        Ok(report)
    }
}

/// Asks for one retry, then fails outright
#[derive(Default)]
struct RetryThenFailReviewer {
    calls: AtomicUsize,
}

#[async_trait]
impl Reviewer for RetryThenFailReviewer {
    async fn review(&self, results: &[WorkerResult], task: &Task) -> Result<ReviewReport> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(ReviewReport::from_results(&task.id, results).with_retry("flaky"));
        }
        Err(Error::Internal("reviewer backend unreachable".to_string()))
    }
}

// ============================================================================
// In-memory executor
// ============================================================================

/// "fail" errors, prompts containing "block" wait for a permit or a kill,
/// the rest echo
struct ScriptedExecutor {
    dispatched: AtomicUsize,
    gate: Semaphore,
    killed: Notify,
    cancelled: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dispatched: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            killed: Notify::new(),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, task: &WorkerTask, _sink: Option<OutputSink>) -> Result<WorkerResult> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        if task.prompt == "fail" {
            return Err(Error::Process("backend crashed".to_string()));
        }
        if task.prompt.contains("block") {
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.map_err(|e| Error::Internal(e.to_string()))?.forget();
                }
                _ = self.killed.notified() => {
                    return Err(Error::Process("killed".to_string()));
                }
            }
        }
        Ok(WorkerResult::completed(
            &task.id,
            format!("done: {}", task.prompt),
            Duration::from_millis(1),
        ))
    }

    async fn cancel(&self, worker_id: &str) -> Result<bool> {
        self.cancelled.lock().push(worker_id.to_string());
        self.killed.notify_waiters();
        Ok(true)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedFactory(Arc<ScriptedExecutor>);

impl ExecutorFactory for ScriptedFactory {
    fn executor_for(&self, _mode: &ExecutionMode) -> Result<Arc<dyn Executor>> {
        Ok(self.0.clone())
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        vec![self.0.clone()]
    }
}

/// Holds up every `scheduler.result` delivery, like a slow UI bridge
struct SlowResultListener;

#[async_trait]
impl EventListener for SlowResultListener {
    fn name(&self) -> &str {
        "slow-result"
    }

    async fn on_event(&self, event: &ConductorEvent) -> Result<()> {
        if event.event_type == RESULT {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    scheduler: CommandScheduler,
    executor: Arc<ScriptedExecutor>,
    rx: broadcast::Receiver<ConductorEvent>,
}

fn harness_with(config: SchedulerConfig, capabilities: Capabilities) -> Harness {
    let executor = ScriptedExecutor::new();
    let pool = WorkerPool::new(
        WorkerPoolConfig {
            max_concurrency: 3,
            queue_capacity: 20,
        },
        Arc::new(ScriptedFactory(executor.clone())),
        Arc::new(EventBus::new()),
    );
    let rx = pool.events().receiver();

    Harness {
        scheduler: CommandScheduler::new(config, capabilities, pool),
        executor,
        rx,
    }
}

fn harness() -> Harness {
    harness_with(SchedulerConfig::default(), default_capabilities())
}

fn default_capabilities() -> Capabilities {
    capabilities_for(ExecutionStrategy::Parallel)
}

fn capabilities_for(strategy: ExecutionStrategy) -> Capabilities {
    Capabilities::new(Arc::new(KeywordAnalyzer), Arc::new(SplitPlanner(strategy)))
}

/// Next event of type `name`, skipping everything else
async fn next_event(rx: &mut broadcast::Receiver<ConductorEvent>, name: &str) -> ConductorEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.event_type == name => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .unwrap_or_else(|_| panic!("no {} event", name))
}

/// Count already-published events of type `name` without waiting
fn drain_count(rx: &mut broadcast::Receiver<ConductorEvent>, name: &str) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if event.event_type == name {
            count += 1;
        }
    }
    count
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_simple_question_is_answered_without_workers() {
    let mut h = harness();
    let task_id = h
        .scheduler
        .submit("list files", SubmitOptions::default())
        .await
        .unwrap();

    let event = next_event(&mut h.rx, RESULT).await;
    assert_eq!(event.data_str("taskId"), Some(task_id.as_str()));
    assert_eq!(
        event.data["report"]["details"].as_str(),
        Some("src/ tests/ Cargo.toml")
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(drain_count(&mut h.rx, RESULT), 0);
    assert_eq!(h.executor.dispatched(), 0);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(
        task.state_history(),
        vec![
            SchedulerState::Idle,
            SchedulerState::Analyzing,
            SchedulerState::Reporting,
            SchedulerState::Idle
        ]
    );
}

#[tokio::test]
async fn test_parallel_plan_with_one_failing_worker() {
    let mut h = harness();
    h.scheduler
        .submit("alpha; fail; gamma", SubmitOptions::default())
        .await
        .unwrap();

    let event = next_event(&mut h.rx, RESULT).await;
    assert_eq!(event.data["report"]["status"], "partial");
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(task.results.len(), 3);
    assert_eq!(h.executor.dispatched(), 3);

    let failed = task.results.iter().find(|r| r.worker_id == "w-2").unwrap();
    assert_eq!(failed.status, WorkerStatus::Failed);
    assert!(!failed.error.as_deref().unwrap_or_default().is_empty());

    let others: Vec<_> = task.results.iter().filter(|r| r.worker_id != "w-2").collect();
    assert!(others.iter().all(|r| r.status == WorkerStatus::Completed));

    let report = task.report.unwrap();
    assert_eq!(report.status, ReportStatus::Partial);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_approval_is_rejection() {
    let mut h = harness();
    let task_id = h
        .scheduler
        .submit("deploy the service", SubmitOptions::default())
        .await
        .unwrap();

    let approval = next_event(&mut h.rx, APPROVAL).await;
    assert_eq!(approval.data_str("taskId"), Some(task_id.as_str()));
    assert_eq!(approval.data["request"]["timeoutSecs"], 300);

    // Nobody answers; the paused clock jumps to the deadline
    let error = next_event(&mut h.rx, ERROR).await;
    let message = error.data_str("error").unwrap();
    assert!(message.contains("rejected"), "unexpected error: {}", message);

    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    assert_eq!(h.executor.dispatched(), 0);
    assert!(!h.scheduler.approve(&task_id));

    let task = h.scheduler.last_task().unwrap();
    assert!(task.error.is_some());
    assert!(task.results.is_empty());
}

#[tokio::test]
async fn test_approval_lets_execution_proceed() {
    let mut h = harness();
    let task_id = h
        .scheduler
        .submit("deploy the service", SubmitOptions::default())
        .await
        .unwrap();

    next_event(&mut h.rx, APPROVAL).await;
    assert_eq!(h.scheduler.state(), SchedulerState::Planning);
    assert!(h.scheduler.approve(&task_id));

    let event = next_event(&mut h.rx, RESULT).await;
    assert_eq!(event.data["report"]["status"], "success");
    assert_eq!(h.executor.dispatched(), 1);
}

#[tokio::test]
async fn test_auto_approve_skips_the_gate() {
    let mut h = harness();
    h.scheduler
        .submit("deploy the service", SubmitOptions::default().auto_approved())
        .await
        .unwrap();

    next_event(&mut h.rx, RESULT).await;
    assert_eq!(drain_count(&mut h.rx, APPROVAL), 0);
    assert_eq!(h.executor.dispatched(), 1);
}

#[tokio::test]
async fn test_busy_scheduler_queues_fifo() {
    let mut h = harness();
    let first = h
        .scheduler
        .submit("block until released", SubmitOptions::default())
        .await
        .unwrap();
    assert!(h.scheduler.state().is_busy());

    let second = h.scheduler.submit("second", SubmitOptions::default()).await.unwrap();
    assert_eq!(h.scheduler.queue_size(), 1);
    let third = h.scheduler.submit("third", SubmitOptions::default()).await.unwrap();
    assert_eq!(h.scheduler.queue_size(), 2);
    assert_eq!(h.scheduler.queued_task_ids(), vec![second.clone(), third.clone()]);

    let queued = next_event(&mut h.rx, QUEUED).await;
    assert_eq!(queued.data_str("taskId"), Some(second.as_str()));
    assert_eq!(queued.data["position"], 1);

    h.executor.gate.add_permits(1);

    let mut finished = Vec::new();
    for _ in 0..3 {
        let event = next_event(&mut h.rx, RESULT).await;
        finished.push(event.data_str("taskId").unwrap().to_string());
    }
    assert_eq!(finished, vec![first, second, third.clone()]);

    assert_eq!(h.scheduler.queue_size(), 0);
    assert_eq!(h.scheduler.last_task().unwrap().id, third);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn test_submit_during_slow_result_delivery_waits_behind_queue() {
    let mut h = harness();
    h.scheduler
        .events()
        .subscribe(Arc::new(SlowResultListener))
        .await;

    let first = h.scheduler.submit("block first", SubmitOptions::default()).await.unwrap();
    let second = h.scheduler.submit("second", SubmitOptions::default()).await.unwrap();
    assert_eq!(h.scheduler.queue_size(), 1);

    h.executor.gate.add_permits(1);
    let event = next_event(&mut h.rx, RESULT).await;
    assert_eq!(event.data_str("taskId"), Some(first.as_str()));

    // The first task is already IDLE while its result listeners still run
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    assert_eq!(h.scheduler.queued_task_ids(), vec![second.clone()]);

    let third = h.scheduler.submit("third", SubmitOptions::default()).await.unwrap();
    let queued = next_event(&mut h.rx, QUEUED).await;
    assert_eq!(queued.data_str("taskId"), Some(third.as_str()));
    assert_eq!(queued.data["position"], 2);
    assert_eq!(
        h.scheduler.current_task().map(|t| t.id),
        Some(second.clone())
    );

    let mut finished = vec![first.clone()];
    for _ in 0..2 {
        let event = next_event(&mut h.rx, RESULT).await;
        finished.push(event.data_str("taskId").unwrap().to_string());
    }
    assert_eq!(finished, vec![first, second, third]);
    assert_eq!(h.scheduler.queue_size(), 0);
}

#[tokio::test]
async fn test_full_queue_rejects_submission() {
    let config = SchedulerConfig {
        queue_capacity: 1,
        ..Default::default()
    };
    let h = harness_with(config, default_capabilities());

    h.scheduler.submit("block", SubmitOptions::default()).await.unwrap();
    h.scheduler.submit("second", SubmitOptions::default()).await.unwrap();

    let err = h
        .scheduler
        .submit("third", SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueFull(_)));
    assert_eq!(h.scheduler.queue_size(), 1);
}

#[tokio::test]
async fn test_cancel_when_idle_returns_false() {
    let h = harness();
    assert!(!h.scheduler.cancel().await);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn test_cancel_running_task() {
    let mut h = harness();
    let task_id = h
        .scheduler
        .submit("block forever", SubmitOptions::default())
        .await
        .unwrap();

    while h.executor.dispatched() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.scheduler.state(), SchedulerState::Executing);

    assert!(h.scheduler.cancel().await);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    assert!(h.executor.cancelled.lock().contains(&"w-1".to_string()));

    let error = next_event(&mut h.rx, ERROR).await;
    assert_eq!(error.data_str("taskId"), Some(task_id.as_str()));

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(task.error.as_deref(), Some("Cancelled by user"));
    assert!(task.state_history().contains(&SchedulerState::Interrupt));

    // Releasing the stale worker later must not resurrect the task
    h.executor.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(drain_count(&mut h.rx, RESULT), 0);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
}

/// Cancel while the first of three workers runs; nothing after it may start
async fn cancel_during_first_worker(strategy: ExecutionStrategy) -> Harness {
    let mut h = harness_with(SchedulerConfig::default(), capabilities_for(strategy));
    h.scheduler
        .submit("block one; two; three", SubmitOptions::default().auto_approved())
        .await
        .unwrap();

    while h.executor.dispatched() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.scheduler.cancel().await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.executor.dispatched(), 1);
    assert_eq!(drain_count(&mut h.rx, RESULT), 0);
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    h
}

#[tokio::test]
async fn test_cancel_stops_remaining_sequential_workers() {
    let h = cancel_during_first_worker(ExecutionStrategy::Sequential).await;

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(task.workers.len(), 3);
    assert_eq!(task.error.as_deref(), Some("Cancelled by user"));
    assert!(h.executor.cancelled.lock().contains(&"w-1".to_string()));
}

#[tokio::test]
async fn test_cancel_stops_remaining_pipeline_steps() {
    let h = cancel_during_first_worker(ExecutionStrategy::Pipeline).await;
    assert!(h.executor.cancelled.lock().contains(&"w-1".to_string()));
}

#[tokio::test]
async fn test_cancelled_scheduler_takes_next_command() {
    let mut h = harness_with(
        SchedulerConfig::default(),
        capabilities_for(ExecutionStrategy::Sequential),
    );
    h.scheduler
        .submit("block a; b; c", SubmitOptions::default().auto_approved())
        .await
        .unwrap();
    let next = h.scheduler.submit("list files", SubmitOptions::default()).await.unwrap();

    while h.executor.dispatched() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.scheduler.cancel().await);

    let event = next_event(&mut h.rx, RESULT).await;
    assert_eq!(event.data_str("taskId"), Some(next.as_str()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.executor.dispatched(), 1);
}

#[tokio::test]
async fn test_review_retry_appends_second_round() {
    let reviewer = Arc::new(RetryOnceReviewer::default());
    let capabilities = default_capabilities().with_reviewer(reviewer.clone());
    let mut h = harness_with(SchedulerConfig::default(), capabilities);

    h.scheduler
        .submit("alpha; beta; gamma", SubmitOptions::default())
        .await
        .unwrap();
    next_event(&mut h.rx, RESULT).await;

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(task.workers.len(), 3);
    assert_eq!(task.results.len(), 6);
    assert_eq!(h.executor.dispatched(), 6);
    assert_eq!(reviewer.calls.load(Ordering::SeqCst), 2);

    let executing = task
        .state_history()
        .into_iter()
        .filter(|s| *s == SchedulerState::Executing)
        .count();
    assert_eq!(executing, 2);
}

#[tokio::test]
async fn test_review_failure_summarizes_latest_round_only() {
    let reviewer = Arc::new(RetryThenFailReviewer::default());
    let capabilities = default_capabilities().with_reviewer(reviewer.clone());
    let mut h = harness_with(SchedulerConfig::default(), capabilities);

    h.scheduler
        .submit("alpha; beta", SubmitOptions::default())
        .await
        .unwrap();
    let event = next_event(&mut h.rx, RESULT).await;

    assert_eq!(reviewer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(event.data["report"]["summary"], "2/2 workers completed");
    assert_eq!(event.data["report"]["status"], "success");

    let task = h.scheduler.last_task().unwrap();
    assert_eq!(task.results.len(), 4);
    assert_eq!(task.report.unwrap().details.lines().count(), 2);
}

#[tokio::test]
async fn test_forbidden_command_never_becomes_a_task() {
    let mut h = harness();
    let err = h
        .scheduler
        .submit("clean up with rm -rf /", SubmitOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PermissionDenied(_)));
    assert!(next_event(&mut h.rx, ERROR).await.data_str("error").is_some());
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    assert!(h.scheduler.last_task().is_none());
    assert_eq!(h.executor.dispatched(), 0);
}
