//! Worker outcome status

use serde::{Deserialize, Serialize};

/// Final status of a worker task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Finished and produced a usable result
    Completed,

    /// Could not run, crashed, or the backend reported an error
    Failed,

    /// Ran past its timeout and was terminated
    Timeout,
}

impl WorkerStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerStatus::Completed)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Timeout => "timeout",
        }
    }

    /// Symbol for progress output
    pub fn symbol(&self) -> &'static str {
        match self {
            WorkerStatus::Completed => "✓",
            WorkerStatus::Failed => "✗",
            WorkerStatus::Timeout => "⏱",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&WorkerStatus::Timeout).unwrap(), "\"timeout\"");
        let status: WorkerStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, WorkerStatus::Failed);
        assert!(!status.is_success());
        assert!(WorkerStatus::Completed.is_success());
    }
}
