//! Approval gate - human-in-the-loop before risky plans run
//!
//! A waiting task holds the receiving half of a oneshot channel;
//! `approve`/`reject` resolve it. If nobody answers before the timeout,
//! the request is treated as rejected. Approval never happens by silence.

use conductor_foundation::ApprovalTimeoutPolicy;
use conductor_task::{ExecutionStrategy, WorkerTask};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default time a human has to answer
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// How a pending approval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    /// Nobody answered in time
    TimedOut,
    /// The request was withdrawn (task cancelled)
    Withdrawn,
}

impl ApprovalDecision {
    /// Whether execution may proceed under `policy`
    pub fn permits(&self, policy: ApprovalTimeoutPolicy) -> bool {
        match self {
            ApprovalDecision::Approved => true,
            ApprovalDecision::TimedOut => match policy {
                ApprovalTimeoutPolicy::Deny => false,
            },
            ApprovalDecision::Rejected | ApprovalDecision::Withdrawn => false,
        }
    }
}

/// Worker summary shown to the approver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPreview {
    pub id: String,
    pub mode: String,
    pub prompt: String,
}

impl From<&WorkerTask> for WorkerPreview {
    fn from(task: &WorkerTask) -> Self {
        Self {
            id: task.id.clone(),
            mode: task.mode.name().to_string(),
            prompt: task.prompt.clone(),
        }
    }
}

/// Payload of the `approval` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub task_id: String,
    pub command: String,
    pub strategy: ExecutionStrategy,
    pub workers: Vec<WorkerPreview>,
    /// Why approval is needed
    pub reasons: Vec<String>,
    pub timeout_secs: u64,
}

/// Pending approvals by task id
#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request; the receiver resolves on approve, reject or withdraw
    pub fn register(&self, task_id: &str) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().insert(task_id.to_string(), tx).is_some() {
            warn!(task_id, "Replacing an existing approval request");
        }
        rx
    }

    /// Wait for an answer, treating silence past `timeout` as [`ApprovalDecision::TimedOut`]
    pub async fn wait(
        &self,
        task_id: &str,
        receiver: oneshot::Receiver<ApprovalDecision>,
        timeout: Duration,
    ) -> ApprovalDecision {
        let decision = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::Withdrawn,
            Err(_) => {
                warn!(task_id, timeout_secs = timeout.as_secs(), "Approval timed out, rejecting");
                ApprovalDecision::TimedOut
            }
        };
        self.pending.lock().remove(task_id);
        decision
    }

    pub fn approve(&self, task_id: &str) -> bool {
        self.resolve(task_id, ApprovalDecision::Approved)
    }

    pub fn reject(&self, task_id: &str) -> bool {
        self.resolve(task_id, ApprovalDecision::Rejected)
    }

    /// Withdraw a request without a human answer
    pub fn withdraw(&self, task_id: &str) -> bool {
        self.resolve(task_id, ApprovalDecision::Withdrawn)
    }

    pub fn is_pending(&self, task_id: &str) -> bool {
        self.pending.lock().contains_key(task_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn resolve(&self, task_id: &str, decision: ApprovalDecision) -> bool {
        let Some(sender) = self.pending.lock().remove(task_id) else {
            return false;
        };
        debug!(task_id, ?decision, "Approval resolved");
        // The waiter may have just timed out
        sender.send(decision).is_ok()
    }
}
