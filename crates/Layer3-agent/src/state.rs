//! Scheduler states and the transition allow-list
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!  IDLE ──► ANALYZING ──► PLANNING ──► EXECUTING ──► REVIEWING ──► REPORTING
//!            │   │            │            ▲            │
//!            │   └─► REPORTING│            └── retry ───┘
//!            └─► IDLE         └─► IDLE
//!
//!  any active state ──► INTERRUPT ──► IDLE
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SchedulerState
// ============================================================================

/// Command scheduler state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    /// Waiting for a command
    #[default]
    Idle,

    /// Classifying the command
    Analyzing,

    /// Turning the analysis into worker tasks
    Planning,

    /// Workers running
    Executing,

    /// Judging worker results
    Reviewing,

    /// Handing the report out
    Reporting,

    /// Cancelling the current task
    Interrupt,
}

impl SchedulerState {
    /// States reachable from this one
    pub fn allowed_next(&self) -> &'static [SchedulerState] {
        use SchedulerState::*;
        match self {
            Idle => &[Analyzing, Interrupt],
            Analyzing => &[Planning, Reporting, Idle, Interrupt],
            Planning => &[Executing, Idle, Interrupt],
            Executing => &[Reviewing, Interrupt],
            Reviewing => &[Reporting, Executing, Interrupt],
            Reporting => &[Idle],
            Interrupt => &[Idle],
        }
    }

    pub fn can_transition_to(&self, next: SchedulerState) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Whether a task is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, SchedulerState::Idle)
    }

    /// Progress percentage reported on entering this state
    pub fn base_progress(&self) -> u8 {
        match self {
            SchedulerState::Idle => 100,
            SchedulerState::Analyzing => 10,
            SchedulerState::Planning => 25,
            SchedulerState::Executing => 40,
            SchedulerState::Reviewing => 85,
            SchedulerState::Reporting => 95,
            SchedulerState::Interrupt => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "IDLE",
            SchedulerState::Analyzing => "ANALYZING",
            SchedulerState::Planning => "PLANNING",
            SchedulerState::Executing => "EXECUTING",
            SchedulerState::Reviewing => "REVIEWING",
            SchedulerState::Reporting => "REPORTING",
            SchedulerState::Interrupt => "INTERRUPT",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress while executing: 40% plus up to 35% by finished workers
pub fn executing_progress(completed: usize, total: usize) -> u8 {
    let base = SchedulerState::Executing.base_progress() as usize;
    if total == 0 {
        return base as u8;
    }
    (base + 35 * completed.min(total) / total) as u8
}

// ============================================================================
// StateTransition
// ============================================================================

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: SchedulerState,
    pub to: SchedulerState,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: SchedulerState, to: SchedulerState) -> Self {
        Self {
            from,
            to,
            timestamp: chrono::Utc::now(),
        }
    }
}
