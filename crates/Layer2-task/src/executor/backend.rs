//! Backend profiles and the argument lists they take

use super::output::OutputFormat;
use super::r#trait::OutputSink;
use crate::task::{BackendOptions, WorkerTask};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Flag dialect of a backend CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgStyle {
    /// `claude -p --output-format json ...`
    Claude,
    /// `codex exec --json ...`
    Codex,
}

/// How to invoke one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Logical name; also the serialization key
    pub identity: String,
    /// Executable name or path
    pub program: String,
    pub style: ArgStyle,
    pub format: OutputFormat,
    /// Appended before the prompt
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl BackendProfile {
    pub fn claude() -> Self {
        Self {
            identity: "claude".to_string(),
            program: "claude".to_string(),
            style: ArgStyle::Claude,
            format: OutputFormat::Json,
            extra_args: Vec::new(),
        }
    }

    pub fn codex() -> Self {
        Self {
            identity: "codex".to_string(),
            program: "codex".to_string(),
            style: ArgStyle::Codex,
            format: OutputFormat::JsonLines,
            extra_args: vec!["--skip-git-repo-check".to_string()],
        }
    }

    /// Built-in profile by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "claude" => Some(Self::claude()),
            "codex" => Some(Self::codex()),
            _ => None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Full argument list, prompt last
    pub fn build_args(&self, params: &RunParams) -> Vec<String> {
        match self.style {
            ArgStyle::Claude => self.claude_args(params),
            ArgStyle::Codex => self.codex_args(params),
        }
    }

    /// Arguments for a long-lived interactive session (no prompt)
    pub fn interactive_args(&self, params: &RunParams) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self.style {
            ArgStyle::Claude => {
                if let (Some(session_id), true) = (&params.session_id, params.resume) {
                    args.extend(["--resume".into(), session_id.clone()]);
                }
                if let Some(model) = &params.model {
                    args.extend(["--model".into(), model.clone()]);
                }
                if let Some(system_prompt) = &params.system_prompt {
                    args.extend(["--append-system-prompt".into(), system_prompt.clone()]);
                }
                if params.skip_permissions {
                    args.push("--dangerously-skip-permissions".into());
                }
                if !params.allowed_tools.is_empty() {
                    args.extend(["--allowedTools".into(), params.allowed_tools.join(",")]);
                }
            }
            ArgStyle::Codex => {
                if let Some(model) = &params.model {
                    args.extend(["-m".into(), model.clone()]);
                }
                if params.skip_permissions {
                    args.push("--dangerously-bypass-approvals-and-sandbox".into());
                }
            }
        }
        args
    }

    fn claude_args(&self, params: &RunParams) -> Vec<String> {
        let mut args: Vec<String> = vec!["-p".into(), "--output-format".into(), "json".into()];

        if let Some(session_id) = &params.session_id {
            if params.resume {
                args.extend(["--resume".into(), session_id.clone()]);
            } else {
                args.extend(["--session-id".into(), session_id.clone()]);
            }
        }
        if let Some(model) = &params.model {
            args.extend(["--model".into(), model.clone()]);
        }
        if let Some(system_prompt) = &params.system_prompt {
            args.extend(["--append-system-prompt".into(), system_prompt.clone()]);
        }
        if params.skip_permissions {
            args.push("--dangerously-skip-permissions".into());
        }
        if !params.allowed_tools.is_empty() {
            args.extend(["--allowedTools".into(), params.allowed_tools.join(",")]);
        }

        args.extend(self.extra_args.iter().cloned());
        args.push(params.prompt.clone());
        args
    }

    fn codex_args(&self, params: &RunParams) -> Vec<String> {
        let mut args: Vec<String> = vec!["exec".into(), "--json".into()];

        if let Some(model) = &params.model {
            args.extend(["-m".into(), model.clone()]);
        }
        if params.skip_permissions {
            args.push("--dangerously-bypass-approvals-and-sandbox".into());
        }
        if !params.allowed_tools.is_empty() {
            tracing::debug!(backend = %self.identity, "Allowed-tool list not supported, ignoring");
        }
        args.extend(self.extra_args.iter().cloned());

        // Sessions are always resumed by id; there is no "start with id" flag
        if let (Some(session_id), true) = (&params.session_id, params.resume) {
            args.extend(["resume".into(), session_id.clone()]);
        }

        let prompt = match &params.system_prompt {
            Some(system_prompt) => format!("{}\n\n{}", system_prompt, params.prompt),
            None => params.prompt.clone(),
        };
        args.push(prompt);
        args
    }
}

/// Input of a single process run
#[derive(Clone)]
pub struct RunParams {
    pub prompt: String,
    /// Backend identity (profile name)
    pub backend: String,
    pub session_id: Option<String>,
    pub resume: bool,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub skip_permissions: bool,
    pub allowed_tools: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// Receives stdout chunks as they arrive
    pub on_chunk: Option<OutputSink>,
    /// Handle for `cancel`
    pub run_id: Option<String>,
}

impl RunParams {
    pub fn new(backend: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            backend: backend.into(),
            session_id: None,
            resume: false,
            model: None,
            system_prompt: None,
            skip_permissions: false,
            allowed_tools: Vec::new(),
            working_dir: None,
            timeout: crate::task::DEFAULT_WORKER_TIMEOUT,
            on_chunk: None,
            run_id: None,
        }
    }

    /// Params for a worker task targeting `backend`
    pub fn from_task(task: &WorkerTask, backend: &str) -> Self {
        let BackendOptions {
            model,
            system_prompt,
            session_id,
            resume,
            skip_permissions,
            allowed_tools,
        } = task.options.clone();

        Self {
            prompt: task.prompt.clone(),
            backend: backend.to_string(),
            session_id,
            resume,
            model,
            system_prompt,
            skip_permissions,
            allowed_tools,
            working_dir: Some(task.working_dir.clone()),
            timeout: task.timeout(),
            on_chunk: None,
            run_id: Some(task.id.clone()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.on_chunk = Some(sink);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>, resume: bool) -> Self {
        self.session_id = Some(session_id.into());
        self.resume = resume;
        self
    }
}

impl std::fmt::Debug for RunParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunParams")
            .field("backend", &self.backend)
            .field("session_id", &self.session_id)
            .field("resume", &self.resume)
            .field("model", &self.model)
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}
