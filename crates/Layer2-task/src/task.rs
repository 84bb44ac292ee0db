//! Worker task definition and result types

use crate::state::WorkerStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Default worker timeout
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(600);

/// New worker identifier (`worker-` + 8 hex chars)
pub fn new_worker_id() -> String {
    format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// How a worker task is executed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One-shot CLI process (`claude -p`, `codex exec`)
    Cli { backend: String },

    /// HTTP call to a model API
    Api,

    /// Interactive CLI driven through a pseudo-terminal
    Terminal { backend: String },

    /// CLI process inside a container
    Container { image: String, backend: String },
}

impl ExecutionMode {
    pub fn cli(backend: impl Into<String>) -> Self {
        Self::Cli {
            backend: backend.into(),
        }
    }

    pub fn terminal(backend: impl Into<String>) -> Self {
        Self::Terminal {
            backend: backend.into(),
        }
    }

    /// Short name used in logs and events
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cli { .. } => "cli",
            Self::Api => "api",
            Self::Terminal { .. } => "terminal",
            Self::Container { .. } => "container",
        }
    }

    /// Backend name, if the mode targets a CLI
    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::Cli { backend }
            | Self::Terminal { backend }
            | Self::Container { backend, .. } => Some(backend),
            Self::Api => None,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::cli("claude")
    }
}

/// Per-call backend options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub session_id: Option<String>,
    /// Continue `session_id` instead of starting a session with that id
    pub resume: bool,
    pub skip_permissions: bool,
    pub allowed_tools: Vec<String>,
}

/// A unit of dispatchable work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    pub id: String,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Instruction text; pipeline mode appends prior output
    pub prompt: String,

    #[serde(default)]
    pub working_dir: PathBuf,

    /// IDs of worker tasks that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// The worker may itself orchestrate sub-workers
    #[serde(default)]
    pub nested_orchestration: bool,

    /// Descriptive only; not checked here
    #[serde(default)]
    pub success_criteria: Vec<String>,

    #[serde(default)]
    pub options: BackendOptions,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_WORKER_TIMEOUT.as_millis() as u64
}

impl WorkerTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: new_worker_id(),
            mode: ExecutionMode::default(),
            prompt: prompt.into(),
            working_dir: PathBuf::from("."),
            dependencies: Vec::new(),
            timeout_ms: default_timeout_ms(),
            nested_orchestration: false,
            success_criteria: Vec::new(),
            options: BackendOptions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome of one worker task. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn completed(worker_id: impl Into<String>, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Completed,
            exit_code: Some(0),
            output: output.into(),
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    pub fn failed(worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Failed,
            exit_code: None,
            output: String::new(),
            duration_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(worker_id: impl Into<String>, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Timeout,
            exit_code: None,
            output: output.into(),
            duration_ms: duration.as_millis() as u64,
            error: Some(format!("Timed out after {:.1}s", duration.as_secs_f64())),
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_task_builder() {
        let task = WorkerTask::new("fix the build")
            .with_id("w-1")
            .with_mode(ExecutionMode::terminal("claude"))
            .with_timeout(Duration::from_secs(30))
            .with_dependencies(vec!["w-0".into()]);

        assert_eq!(task.id, "w-1");
        assert_eq!(task.mode.name(), "terminal");
        assert_eq!(task.mode.backend(), Some("claude"));
        assert_eq!(task.timeout(), Duration::from_secs(30));
        assert_eq!(task.dependencies, vec!["w-0".to_string()]);
    }

    #[test]
    fn test_worker_task_from_plan_json() {
        let task: WorkerTask = serde_json::from_value(serde_json::json!({
            "id": "w-2",
            "mode": { "type": "container", "image": "node:20", "backend": "codex" },
            "prompt": "run the tests",
            "successCriteria": ["tests pass"]
        }))
        .unwrap();

        assert_eq!(task.timeout(), DEFAULT_WORKER_TIMEOUT);
        assert_eq!(task.mode.backend(), Some("codex"));
        assert!(task.dependencies.is_empty());
        assert!(!task.nested_orchestration);
    }

    #[test]
    fn test_worker_result_constructors() {
        let ok = WorkerResult::completed("w-1", "done", Duration::from_millis(1500));
        assert!(ok.is_success());
        assert_eq!(ok.exit_code, Some(0));
        assert_eq!(ok.duration_ms, 1500);

        let failed = WorkerResult::failed("w-2", "spawn failed");
        assert_eq!(failed.status, WorkerStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("spawn failed"));

        let timeout = WorkerResult::timed_out("w-3", "partial", Duration::from_secs(5));
        assert_eq!(timeout.status, WorkerStatus::Timeout);
        assert_eq!(timeout.output, "partial");

        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["workerId"], "w-1");
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(new_worker_id(), new_worker_id());
        assert!(new_worker_id().starts_with("worker-"));
    }
}
