//! Worker pool events
//!
//! All payloads use camelCase keys.

use crate::task::{WorkerResult, WorkerTask};
use conductor_foundation::{ConductorEvent, EventCategory, EventSeverity};
use serde_json::json;

pub const STARTED: &str = "worker.started";
pub const OUTPUT: &str = "worker.output";
pub const ERROR: &str = "worker.error";
pub const DONE: &str = "worker.done";
pub const QUEUED: &str = "worker.queued";

const SOURCE: &str = "worker_pool";

fn event(name: &str, worker_id: &str) -> ConductorEvent {
    ConductorEvent::new(name, EventCategory::Worker)
        .with_source(SOURCE)
        .with_metadata("workerId", json!(worker_id))
}

pub fn started(task: &WorkerTask) -> ConductorEvent {
    event(STARTED, &task.id).with_data(json!({
        "workerId": task.id,
        "mode": task.mode.name(),
    }))
}

pub fn output(worker_id: &str, content: &str) -> ConductorEvent {
    event(OUTPUT, worker_id)
        .with_severity(EventSeverity::Debug)
        .with_data(json!({ "workerId": worker_id, "content": content }))
}

pub fn error(worker_id: &str, error: &str) -> ConductorEvent {
    event(ERROR, worker_id)
        .with_severity(EventSeverity::Error)
        .with_data(json!({ "workerId": worker_id, "error": error }))
}

pub fn done(result: &WorkerResult) -> ConductorEvent {
    event(DONE, &result.worker_id).with_data(json!({
        "workerId": result.worker_id,
        "result": result,
    }))
}

pub fn queued(worker_id: &str, position: usize, queue_size: usize) -> ConductorEvent {
    event(QUEUED, worker_id).with_data(json!({
        "workerId": worker_id,
        "position": position,
        "queueSize": queue_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_payload_keys() {
        let result = WorkerResult::completed("w-1", "ok", Duration::from_millis(20));
        let event = done(&result);
        assert!(event.is("worker"));
        assert_eq!(event.data["result"]["workerId"], "w-1");
        assert_eq!(event.data["result"]["durationMs"], 20);

        let event = queued("w-2", 3, 3);
        assert_eq!(event.data["position"], 3);
        assert_eq!(event.data["queueSize"], 3);
        assert_eq!(event.data_str("workerId"), Some("w-2"));
    }
}
