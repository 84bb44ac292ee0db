//! # conductor-agent
//!
//! Command scheduler for Conductor.
//! Takes one user command at a time through analysis, planning, approval,
//! execution, review and reporting, and queues the rest.
//!
//! ## Components
//!
//! - **CommandScheduler**: state machine owner and FIFO command queue
//! - **Capabilities**: pluggable security policy, analyzer, planner, reviewer and reporter
//! - **ApprovalGate**: human approval with timeout-as-rejection
//!
//! ## Usage
//!
//! ```ignore
//! use conductor_agent::{Capabilities, CommandScheduler, SubmitOptions};
//! use conductor_foundation::{ConductorConfig, EventBus};
//!
//! let config = ConductorConfig::load()?;
//! let events = Arc::new(EventBus::new());
//! let scheduler = CommandScheduler::from_config(
//!     &config,
//!     Capabilities::new(analyzer, planner),
//!     events.clone(),
//! );
//!
//! let mut rx = events.receiver();
//! let task_id = scheduler.submit("fix the failing tests", SubmitOptions::default()).await?;
//!
//! // Later, from the UI
//! scheduler.approve(&task_id);
//! ```

pub mod approval;
pub mod capability;
pub mod events;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod security;
pub mod state;
pub mod task;

// Scheduler
pub use scheduler::{CommandScheduler, SchedulerConfig, SchedulerStatus};
pub use state::{executing_progress, SchedulerState, StateTransition};
pub use task::{new_task_id, QueuedCommand, SubmitOptions, Task};
pub use queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY};

// Capabilities
pub use capability::{
    Analysis, Analyzer, Capabilities, CommandContext, Complexity, Intent, LogReporter, Plan,
    Planner, Reporter, Reviewer, SecurityPolicy, SummaryReviewer,
};
pub use security::PatternSecurityPolicy;

// Approval and reports
pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalRequest, WorkerPreview, DEFAULT_APPROVAL_TIMEOUT,
};
pub use report::{BuildStatus, ReportStatus, ReviewReport};
