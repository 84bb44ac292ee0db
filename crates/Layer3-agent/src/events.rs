//! Scheduler events
//!
//! All payloads use camelCase keys.

use crate::approval::ApprovalRequest;
use crate::report::ReviewReport;
use crate::state::SchedulerState;
use conductor_foundation::{ConductorEvent, EventCategory, EventSeverity};
use serde_json::json;

pub const PROGRESS: &str = "scheduler.progress";
pub const RESULT: &str = "scheduler.result";
pub const ERROR: &str = "scheduler.error";
pub const QUEUED: &str = "scheduler.queued";
pub const APPROVAL: &str = "scheduler.approval";

const SOURCE: &str = "command_scheduler";

fn event(name: &str, task_id: &str) -> ConductorEvent {
    ConductorEvent::new(name, EventCategory::Scheduler)
        .with_source(SOURCE)
        .with_task(task_id)
}

/// Progress snapshot
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    pub task_id: &'a str,
    pub state: SchedulerState,
    pub message: &'a str,
    pub progress: u8,
    pub worker_count: usize,
    pub completed_workers: usize,
}

pub fn progress(p: Progress<'_>) -> ConductorEvent {
    event(PROGRESS, p.task_id)
        .with_severity(EventSeverity::Debug)
        .with_data(json!({
            "taskId": p.task_id,
            "state": p.state,
            "message": p.message,
            "progress": p.progress,
            "workerCount": p.worker_count,
            "completedWorkers": p.completed_workers,
        }))
}

pub fn result(report: &ReviewReport) -> ConductorEvent {
    event(RESULT, &report.task_id).with_data(json!({
        "taskId": report.task_id,
        "report": report,
    }))
}

pub fn error(task_id: &str, error: &str) -> ConductorEvent {
    event(ERROR, task_id)
        .with_severity(EventSeverity::Error)
        .with_data(json!({ "taskId": task_id, "error": error }))
}

pub fn queued(task_id: &str, position: usize) -> ConductorEvent {
    event(QUEUED, task_id).with_data(json!({ "taskId": task_id, "position": position }))
}

pub fn approval(request: &ApprovalRequest) -> ConductorEvent {
    event(APPROVAL, &request.task_id)
        .with_severity(EventSeverity::Warning)
        .with_data(json!({ "taskId": request.task_id, "request": request }))
}
