//! Task - one command's lifecycle record

use crate::capability::{Analysis, Plan};
use crate::report::ReviewReport;
use crate::state::{SchedulerState, StateTransition};
use chrono::{DateTime, Utc};
use conductor_task::{WorkerResult, WorkerTask};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// New task identifier (`task-` + 8 hex chars)
pub fn new_task_id() -> String {
    format!("task-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Per-command submit options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitOptions {
    pub project_path: Option<PathBuf>,
    /// Skip the approval gate for this command
    pub auto_approve: bool,
}

impl SubmitOptions {
    pub fn in_project(path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn auto_approved(mut self) -> Self {
        self.auto_approve = true;
        self
    }
}

/// A command's full lifecycle, owned by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub command: String,
    pub state: SchedulerState,
    pub options: SubmitOptions,
    pub analysis: Option<Analysis>,
    pub plan: Option<Plan>,
    /// Worker tasks dispatched for this command
    pub workers: Vec<WorkerTask>,
    /// Results of every round; a retry round appends
    pub results: Vec<WorkerResult>,
    pub report: Option<ReviewReport>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal error, if the task did not finish normally
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, command: impl Into<String>, options: SubmitOptions) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: SchedulerState::Idle,
            options,
            analysis: None,
            plan: None,
            workers: Vec::new(),
            results: Vec::new(),
            report: None,
            transitions: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub(crate) fn record_transition(&mut self, to: SchedulerState) {
        self.transitions.push(StateTransition::new(self.state, to));
        self.state = to;
    }

    /// States visited, starting from the first
    pub fn state_history(&self) -> Vec<SchedulerState> {
        let mut states: Vec<SchedulerState> = self.transitions.iter().map(|t| t.from).take(1).collect();
        states.extend(self.transitions.iter().map(|t| t.to));
        states
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }
}

/// A command waiting for the scheduler to become idle
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub task_id: String,
    pub command: String,
    pub options: SubmitOptions,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedCommand {
    pub fn new(task_id: impl Into<String>, command: impl Into<String>, options: SubmitOptions) -> Self {
        Self {
            task_id: task_id.into(),
            command: command.into(),
            options,
            enqueued_at: Utc::now(),
        }
    }
}
