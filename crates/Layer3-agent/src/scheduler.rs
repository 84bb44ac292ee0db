//! Command Scheduler - one command at a time through a strict state machine
//!
//! `submit` returns a task id right away; the pipeline runs on its own
//! tokio task:
//!
//! ```text
//! submit ─► security check ─► busy or queue non-empty? ─yes─► command queue (FIFO)
//!                               │ no
//!                               ▼
//!   ANALYZING ─► PLANNING ─► [approval] ─► EXECUTING ─► REVIEWING ─► REPORTING ─► IDLE
//!       │                                      ▲             │                     │
//!       └── direct answer ─► REPORTING         └── retry ────┘      next queued ◄──┘
//! ```
//!
//! Every step re-checks a generation counter after each await. `cancel`
//! bumps it, so a pipeline that resumes after its task was abandoned
//! sees a stale generation and stops without touching shared state.
//! It also trips the task's cancellation token, which keeps the worker
//! strategy from dispatching anything further.

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest, WorkerPreview};
use crate::capability::{Capabilities, CommandContext, Plan};
use crate::events::{self, Progress};
use crate::queue::CommandQueue;
use crate::report::ReviewReport;
use crate::state::{executing_progress, SchedulerState};
use crate::task::{new_task_id, QueuedCommand, SubmitOptions, Task};
use chrono::Utc;
use conductor_foundation::{
    ApprovalTimeoutPolicy, ConductorConfig, Error, EventBus, Result, SchedulerSettings,
};
use conductor_task::{
    run_strategy_until, DefaultExecutorFactory, ResultCallback, WorkerPool, WorkerPoolConfig,
    WorkerResult,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Commands that may wait while a task runs
    pub queue_capacity: usize,

    /// How long an approval request stays open
    pub approval_timeout: Duration,

    /// What an unanswered approval means
    pub approval_timeout_policy: ApprovalTimeoutPolicy,

    /// Skip approval for every command
    pub auto_approve: bool,

    /// Extra execute/review rounds when the review asks for one
    pub max_retry_rounds: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            approval_timeout: Duration::from_secs(settings.approval_timeout_secs),
            approval_timeout_policy: settings.approval_timeout_policy,
            auto_approve: settings.auto_approve,
            max_retry_rounds: settings.max_retry_rounds,
        }
    }
}

/// Externally visible scheduler status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub current_task_id: Option<String>,
    pub queue_size: usize,
}

// ============================================================================
// Internals
// ============================================================================

/// Why a pipeline stopped early
enum Step {
    /// The task was cancelled or replaced; nothing to do
    Stale,
    Failed(Error),
}

impl From<Error> for Step {
    fn from(error: Error) -> Self {
        Step::Failed(error)
    }
}

struct Core {
    state: SchedulerState,
    current: Option<Task>,
    /// Bumped whenever a task starts or is abandoned
    generation: u64,
    /// Stops worker dispatch for the current task
    cancel: CancellationToken,
    queue: CommandQueue,
    last_task: Option<Task>,
}

impl Core {
    /// Make a command the current task in ANALYZING; returns its generation
    fn start(&mut self, task_id: &str, command: &str, options: SubmitOptions) -> u64 {
        let mut task = Task::new(task_id, command, options);
        task.record_transition(SchedulerState::Analyzing);
        self.state = SchedulerState::Analyzing;
        self.generation += 1;
        self.cancel = CancellationToken::new();
        self.current = Some(task);
        self.generation
    }
}

enum Admission {
    Start { generation: u64 },
    Queued { position: usize },
    Full(Error),
}

struct Inner {
    config: SchedulerConfig,
    capabilities: Capabilities,
    pool: WorkerPool,
    events: Arc<EventBus>,
    approvals: ApprovalGate,
    core: Mutex<Core>,
}

// ============================================================================
// CommandScheduler
// ============================================================================

/// Command Scheduler - owns the current task and the command queue
#[derive(Clone)]
pub struct CommandScheduler {
    inner: Arc<Inner>,
}

impl CommandScheduler {
    /// Scheduler on an existing pool; events go to the pool's bus
    pub fn new(config: SchedulerConfig, capabilities: Capabilities, pool: WorkerPool) -> Self {
        let events = Arc::clone(pool.events());
        let queue = CommandQueue::new(config.queue_capacity);

        Self {
            inner: Arc::new(Inner {
                config,
                capabilities,
                pool,
                events,
                approvals: ApprovalGate::new(),
                core: Mutex::new(Core {
                    state: SchedulerState::Idle,
                    current: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    queue,
                    last_task: None,
                }),
            }),
        }
    }

    /// Scheduler, pool and built-in executors from one config
    pub fn from_config(
        config: &ConductorConfig,
        capabilities: Capabilities,
        events: Arc<EventBus>,
    ) -> Self {
        let pool = WorkerPool::new(
            WorkerPoolConfig::from(&config.pool),
            Arc::new(DefaultExecutorFactory::new(config)),
            events,
        );
        Self::new(SchedulerConfig::from(&config.scheduler), capabilities, pool)
    }

    /// Submit a command; returns its task id without waiting for the pipeline
    pub async fn submit(&self, command: impl Into<String>, options: SubmitOptions) -> Result<String> {
        self.inner
            .submit_with_id(new_task_id(), command.into(), options)
            .await
    }

    /// Approve a pending approval request
    pub fn approve(&self, task_id: &str) -> bool {
        let approved = self.inner.approvals.approve(task_id);
        if approved {
            info!(task_id, "Plan approved");
        }
        approved
    }

    /// Reject a pending approval request
    pub fn reject(&self, task_id: &str) -> bool {
        let rejected = self.inner.approvals.reject(task_id);
        if rejected {
            info!(task_id, "Plan rejected");
        }
        rejected
    }

    /// Stop the current task and its workers; `false` if idle
    pub async fn cancel(&self) -> bool {
        self.inner.cancel().await
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.core.lock().state
    }

    pub fn status(&self) -> SchedulerStatus {
        let core = self.inner.core.lock();
        SchedulerStatus {
            state: core.state,
            current_task_id: core.current.as_ref().map(|t| t.id.clone()),
            queue_size: core.queue.len(),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.core.lock().queue.len()
    }

    /// Task ids waiting in the command queue, oldest first
    pub fn queued_task_ids(&self) -> Vec<String> {
        self.inner.core.lock().queue.task_ids()
    }

    pub fn current_task(&self) -> Option<Task> {
        self.inner.core.lock().current.clone()
    }

    /// Most recently finished task (in memory only)
    pub fn last_task(&self) -> Option<Task> {
        self.inner.core.lock().last_task.clone()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl Inner {
    // ========================================================================
    // Admission
    // ========================================================================

    /// Security check, then start the command or queue it
    async fn submit_with_id(
        self: &Arc<Self>,
        task_id: String,
        command: String,
        options: SubmitOptions,
    ) -> Result<String> {
        if let Err(e) = self.capabilities.security.validate_command(&command) {
            warn!(task_id = %task_id, "Command failed security check: {}", e);
            self.events.publish(events::error(&task_id, &e.to_string())).await;
            return Err(e);
        }
        let forced_approval = self.capabilities.security.requires_approval(&command);

        let (admission, idle) = {
            let mut core = self.core.lock();
            let idle = !core.state.is_busy() && core.current.is_none();
            // Waiting commands keep their turn even when the machine is already idle
            let admission = if !idle || !core.queue.is_empty() {
                match core.queue.push(QueuedCommand::new(&task_id, &command, options)) {
                    Ok(position) => Admission::Queued { position },
                    Err(e) => Admission::Full(e),
                }
            } else {
                Admission::Start {
                    generation: core.start(&task_id, &command, options),
                }
            };
            (admission, idle)
        };

        match admission {
            Admission::Start { generation } => self.launch(&task_id, generation, forced_approval),
            Admission::Queued { position } => {
                info!(task_id = %task_id, position, "Command queued");
                self.events.publish(events::queued(&task_id, position)).await;
                if idle {
                    self.drain_queue().await;
                }
            }
            Admission::Full(e) => {
                warn!(task_id = %task_id, "Command queue full");
                self.events.publish(events::error(&task_id, &e.to_string())).await;
                return Err(e);
            }
        }

        Ok(task_id)
    }

    fn launch(self: &Arc<Self>, task_id: &str, generation: u64, forced_approval: bool) {
        info!(task_id, "Task started");
        tokio::spawn(Arc::clone(self).run(generation, forced_approval));
    }

    /// Start the oldest queued command, skipping ones that fail the security check.
    ///
    /// Popping and starting happen under one lock, so nothing submitted in
    /// between can overtake the head of the queue.
    async fn drain_queue(self: &Arc<Self>) {
        loop {
            let (next, started) = {
                let mut core = self.core.lock();
                if core.current.is_some() {
                    return;
                }
                let Some(next) = core.queue.pop() else {
                    return;
                };
                let security = &self.capabilities.security;
                let started = security.validate_command(&next.command).map(|()| {
                    let forced = security.requires_approval(&next.command);
                    let generation = core.start(&next.task_id, &next.command, next.options.clone());
                    (generation, forced)
                });
                (next, started)
            };

            debug!(task_id = %next.task_id, "Dequeued command");
            match started {
                Ok((generation, forced_approval)) => {
                    self.launch(&next.task_id, generation, forced_approval);
                    return;
                }
                Err(e) => {
                    warn!(task_id = %next.task_id, "Queued command failed security check: {}", e);
                    self.events
                        .publish(events::error(&next.task_id, &e.to_string()))
                        .await;
                }
            }
        }
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    fn run(self: Arc<Self>, generation: u64, forced_approval: bool) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match self.drive(generation, forced_approval).await {
                Ok(()) => {}
                Err(Step::Stale) => return,
                Err(Step::Failed(e)) => self.fail(generation, e).await,
            }
            self.drain_queue().await;
        })
    }

    async fn drive(&self, generation: u64, forced_approval: bool) -> std::result::Result<(), Step> {
        let task = self.snapshot(generation)?;
        let context = CommandContext {
            task_id: task.id.clone(),
            command: task.command.clone(),
            project_path: task.options.project_path.clone(),
        };

        // ANALYZING (entered on submit)
        self.publish_progress(generation, "Analyzing command").await?;
        let analysis = self
            .capabilities
            .analyzer
            .analyze(&task.command, &context)
            .await?;
        self.update(generation, |t| t.analysis = Some(analysis.clone()))?;

        if analysis.is_direct_answer() {
            debug!(task_id = %task.id, "Direct answer, skipping planning");
            return self
                .deliver(generation, ReviewReport::answer(&task.id, &analysis))
                .await;
        }

        // PLANNING
        self.enter(generation, SchedulerState::Planning, "Planning worker tasks")
            .await?;
        let plan = self.capabilities.planner.plan(&analysis, &context).await?;
        if plan.workers.is_empty() {
            return Err(Error::Task("Plan contains no worker tasks".to_string()).into());
        }
        self.update(generation, |t| {
            t.workers = plan.workers.clone();
            t.plan = Some(plan.clone());
        })?;

        let mut reasons = Vec::new();
        if plan.requires_approval {
            reasons.push("Plan requires approval".to_string());
        }
        if analysis.requires_approval {
            reasons.push("Analysis flagged the command as risky".to_string());
        }
        if forced_approval {
            reasons.push("Command matched a dangerous pattern".to_string());
        }
        let auto_approve = self.config.auto_approve || task.options.auto_approve;
        if !reasons.is_empty() && !auto_approve {
            self.await_approval(generation, &task, &plan, reasons).await?;
        }

        // EXECUTING / REVIEWING, with at most `max_retry_rounds` extra rounds
        let mut results = self.execute_round(generation, &plan).await?;
        let mut rounds = 0;
        let report = loop {
            self.enter(generation, SchedulerState::Reviewing, "Reviewing results")
                .await?;
            let snapshot = self.snapshot(generation)?;
            let report = match self.capabilities.reviewer.review(&results, &snapshot).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(task_id = %snapshot.id, "Review failed, summarizing statuses: {}", e);
                    ReviewReport::from_results(&snapshot.id, &results)
                }
            };

            if report.should_retry && rounds < self.config.max_retry_rounds {
                rounds += 1;
                info!(
                    task_id = %snapshot.id,
                    round = rounds,
                    reason = report.retry_reason.as_deref().unwrap_or("unspecified"),
                    "Review requested a retry"
                );
                results = self.execute_round(generation, &plan).await?;
                continue;
            }
            break report;
        };

        self.deliver(generation, report).await
    }

    /// Ask for approval and wait; anything but an explicit approve stops the task
    async fn await_approval(
        &self,
        generation: u64,
        task: &Task,
        plan: &Plan,
        reasons: Vec<String>,
    ) -> std::result::Result<(), Step> {
        let receiver = self.approvals.register(&task.id);
        let request = ApprovalRequest {
            task_id: task.id.clone(),
            command: task.command.clone(),
            strategy: plan.strategy,
            workers: plan.workers.iter().map(WorkerPreview::from).collect(),
            reasons,
            timeout_secs: self.config.approval_timeout.as_secs(),
        };

        info!(task_id = %task.id, workers = plan.workers.len(), "Waiting for approval");
        self.events.publish(events::approval(&request)).await;

        let decision = self
            .approvals
            .wait(&task.id, receiver, self.config.approval_timeout)
            .await;
        self.snapshot(generation)?;

        if decision.permits(self.config.approval_timeout_policy) {
            return Ok(());
        }

        let message = match decision {
            ApprovalDecision::TimedOut => format!(
                "no response within {}s, treated as rejection",
                self.config.approval_timeout.as_secs()
            ),
            ApprovalDecision::Withdrawn => "request withdrawn".to_string(),
            _ => "rejected by user".to_string(),
        };
        Err(Error::ApprovalRejected(message).into())
    }

    /// One EXECUTING round; results are appended to the task
    async fn execute_round(
        &self,
        generation: u64,
        plan: &Plan,
    ) -> std::result::Result<Vec<WorkerResult>, Step> {
        let total = plan.workers.len();
        self.enter(
            generation,
            SchedulerState::Executing,
            &format!("Running {} worker(s) ({})", total, plan.strategy),
        )
        .await?;
        let (task_id, cancel) = {
            let core = self.core.lock();
            match core.current.as_ref() {
                Some(task) if core.generation == generation => {
                    (task.id.clone(), core.cancel.clone())
                }
                _ => return Err(Step::Stale),
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let callback: ResultCallback = Arc::new(move |_result: &WorkerResult| {
            let _ = tx.send(());
        });

        let bus = Arc::clone(&self.events);
        let progress_task_id = task_id.clone();
        let forwarder = tokio::spawn(async move {
            let mut completed = 0;
            while rx.recv().await.is_some() {
                completed += 1;
                let message = format!("{}/{} workers finished", completed, total);
                bus.publish(events::progress(Progress {
                    task_id: &progress_task_id,
                    state: SchedulerState::Executing,
                    message: &message,
                    progress: executing_progress(completed, total),
                    worker_count: total,
                    completed_workers: completed,
                }))
                .await;
            }
        });

        let results = run_strategy_until(
            &self.pool,
            plan.strategy,
            plan.workers.clone(),
            Some(callback),
            &cancel,
        )
        .await;
        if let Err(e) = forwarder.await {
            debug!(task_id = %task_id, "Progress forwarder ended abnormally: {}", e);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(task_id = %task_id, workers = results.len(), failed, "Execution round finished");

        self.update(generation, |t| t.results.extend(results.iter().cloned()))?;
        Ok(results)
    }

    /// REPORTING, then back to IDLE
    async fn deliver(&self, generation: u64, report: ReviewReport) -> std::result::Result<(), Step> {
        self.enter(generation, SchedulerState::Reporting, "Reporting").await?;

        if let Err(e) = self.capabilities.reporter.report(&report).await {
            warn!(task_id = %report.task_id, "Reporter failed: {}", e);
        }

        let finished = {
            let mut core = self.core.lock();
            if core.generation != generation || core.current.is_none() {
                return Err(Step::Stale);
            }
            if !core.state.can_transition_to(SchedulerState::Idle) {
                return Err(Error::invalid_transition(core.state, SchedulerState::Idle).into());
            }
            core.state = SchedulerState::Idle;
            let mut task = core.current.take().ok_or(Step::Stale)?;
            task.record_transition(SchedulerState::Idle);
            task.report = Some(report.clone());
            task.completed_at = Some(Utc::now());
            core.last_task = Some(task.clone());
            task
        };

        info!(
            task_id = %finished.id,
            status = ?report.status,
            results = finished.results.len(),
            "Task completed"
        );
        self.events.publish(events::result(&report)).await;
        self.events
            .publish(events::progress(Progress {
                task_id: &finished.id,
                state: SchedulerState::Idle,
                message: "Completed",
                progress: SchedulerState::Idle.base_progress(),
                worker_count: finished.workers.len(),
                completed_workers: finished.results.len(),
            }))
            .await;
        Ok(())
    }

    /// End the current task with an error and return to IDLE
    async fn fail(&self, generation: u64, cause: Error) {
        let message = cause.to_string();

        let task_id = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            let from = core.state;
            let Some(mut task) = core.current.take() else {
                return;
            };

            if matches!(cause, Error::InvalidTransition { .. }) {
                error!(task_id = %task.id, state = %from, "Forced reset to IDLE: {}", message);
                task.record_transition(SchedulerState::Idle);
            } else {
                if !from.can_transition_to(SchedulerState::Idle) {
                    task.record_transition(SchedulerState::Interrupt);
                }
                task.record_transition(SchedulerState::Idle);
                warn!(task_id = %task.id, state = %from, "Task failed: {}", message);
            }

            core.state = SchedulerState::Idle;
            task.error = Some(message.clone());
            task.completed_at = Some(Utc::now());
            let task_id = task.id.clone();
            core.last_task = Some(task);
            task_id
        };

        self.events.publish(events::error(&task_id, &message)).await;
    }

    async fn cancel(self: &Arc<Self>) -> bool {
        let (task_id, worker_ids) = {
            let mut core = self.core.lock();
            let Some(mut task) = core.current.take() else {
                return false;
            };
            core.generation += 1;
            core.cancel.cancel();

            if core.state.can_transition_to(SchedulerState::Interrupt) {
                task.record_transition(SchedulerState::Interrupt);
            }
            task.record_transition(SchedulerState::Idle);
            core.state = SchedulerState::Idle;

            task.error = Some("Cancelled by user".to_string());
            task.completed_at = Some(Utc::now());
            let ids = (task.id.clone(), task.worker_ids());
            core.last_task = Some(task);
            ids
        };

        self.approvals.withdraw(&task_id);
        let stopped = self.pool.cancel_all(&worker_ids).await;
        info!(task_id = %task_id, workers_stopped = stopped, "Task cancelled");

        self.events
            .publish(events::error(&task_id, "Cancelled by user"))
            .await;
        self.drain_queue().await;
        true
    }

    // ========================================================================
    // Guarded access to the current task
    // ========================================================================

    /// Move to `to` and publish progress
    async fn enter(
        &self,
        generation: u64,
        to: SchedulerState,
        message: &str,
    ) -> std::result::Result<(), Step> {
        {
            let mut core = self.core.lock();
            let core = &mut *core;
            if core.generation != generation {
                return Err(Step::Stale);
            }
            let Some(task) = core.current.as_mut() else {
                return Err(Step::Stale);
            };
            if !core.state.can_transition_to(to) {
                return Err(Error::invalid_transition(core.state, to).into());
            }
            debug!(task_id = %task.id, from = %core.state, to = %to, "State transition");
            core.state = to;
            task.record_transition(to);
        }
        self.publish_progress(generation, message).await
    }

    async fn publish_progress(&self, generation: u64, message: &str) -> std::result::Result<(), Step> {
        let (task_id, state, workers, completed) = {
            let core = self.core.lock();
            match core.current.as_ref() {
                Some(task) if core.generation == generation => (
                    task.id.clone(),
                    core.state,
                    task.workers.len(),
                    task.results.len(),
                ),
                _ => return Err(Step::Stale),
            }
        };

        self.events
            .publish(events::progress(Progress {
                task_id: &task_id,
                state,
                message,
                progress: state.base_progress(),
                worker_count: workers,
                completed_workers: completed,
            }))
            .await;
        Ok(())
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut Task)) -> std::result::Result<(), Step> {
        let mut core = self.core.lock();
        if core.generation != generation {
            return Err(Step::Stale);
        }
        match core.current.as_mut() {
            Some(task) => {
                f(task);
                Ok(())
            }
            None => Err(Step::Stale),
        }
    }

    fn snapshot(&self, generation: u64) -> std::result::Result<Task, Step> {
        let core = self.core.lock();
        match core.current.as_ref() {
            Some(task) if core.generation == generation => Ok(task.clone()),
            _ => Err(Step::Stale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Analysis, Analyzer, Complexity, Intent, Planner};
    use async_trait::async_trait;
    use conductor_task::{
        ExecutionMode, ExecutionStrategy, Executor, ExecutorFactory, WorkerTask,
    };

    struct QuestionAnalyzer;

    #[async_trait]
    impl Analyzer for QuestionAnalyzer {
        async fn analyze(&self, command: &str, _context: &CommandContext) -> Result<Analysis> {
            Ok(Analysis::new(Intent::Question, Complexity::Simple, command).with_answer("42"))
        }
    }

    struct NoPlanner;

    #[async_trait]
    impl Planner for NoPlanner {
        async fn plan(&self, _analysis: &Analysis, _context: &CommandContext) -> Result<Plan> {
            Ok(Plan::new(ExecutionStrategy::Single, Vec::<WorkerTask>::new()))
        }
    }

    struct NoExecutors;

    impl ExecutorFactory for NoExecutors {
        fn executor_for(&self, mode: &ExecutionMode) -> Result<Arc<dyn Executor>> {
            Err(Error::NotFound(format!("no executor for {}", mode.name())))
        }

        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            Vec::new()
        }
    }

    fn scheduler() -> CommandScheduler {
        let pool = WorkerPool::new(
            WorkerPoolConfig::default(),
            Arc::new(NoExecutors),
            Arc::new(EventBus::new()),
        );
        CommandScheduler::new(
            SchedulerConfig::default(),
            Capabilities::new(Arc::new(QuestionAnalyzer), Arc::new(NoPlanner)),
            pool,
        )
    }

    #[test]
    fn test_config_from_settings() {
        let config = SchedulerConfig::default();
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.approval_timeout, Duration::from_secs(300));
        assert_eq!(config.max_retry_rounds, 1);
        assert!(!config.auto_approve);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let scheduler = scheduler();
        assert!(!scheduler.cancel().await);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.last_task().is_none());
    }

    #[tokio::test]
    async fn test_forbidden_command_is_rejected_before_task() {
        let scheduler = scheduler();
        let err = scheduler
            .submit("wipe it all: rm -rf /", SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(scheduler.status().current_task_id, None);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_submit_enters_analyzing_synchronously() {
        let scheduler = scheduler();
        let task_id = scheduler.submit("what is this", SubmitOptions::default()).await.unwrap();

        // The pipeline has not been polled yet on the current-thread runtime
        let status = scheduler.status();
        assert_eq!(status.state, SchedulerState::Analyzing);
        assert_eq!(status.current_task_id.as_deref(), Some(task_id.as_str()));
    }
}
