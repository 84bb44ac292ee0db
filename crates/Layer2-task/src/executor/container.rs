//! Container executor - backend CLI inside `docker run`
//!
//! The backend's own argument list is appended after the image, and the
//! call goes through [`ProcessExecutor::run_spec`], so timeouts, output
//! parsing and per-identity serialization behave exactly like the host
//! process path. Identity is `container:<image>:<backend>`.

use super::backend::RunParams;
use super::output::{NormalizedResult, ProcessErrorKind};
use super::process::{to_worker_result, CommandSpec, ProcessExecutor};
use super::r#trait::{Executor, OutputSink};
use crate::task::{ExecutionMode, WorkerResult, WorkerTask};
use async_trait::async_trait;
use conductor_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const WORKSPACE_MOUNT: &str = "/workspace";

/// Container runtime type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Resource limits for a worker container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit (number of cores, e.g., 1.5)
    pub cpus: Option<f32>,
    /// Memory limit (e.g., "512m", "2g")
    pub memory: Option<String>,
    pub pids_limit: Option<u32>,
}

impl ResourceLimits {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(cpus) = self.cpus {
            args.extend(["--cpus".to_string(), cpus.to_string()]);
        }
        if let Some(memory) = &self.memory {
            args.extend(["--memory".to_string(), memory.clone()]);
        }
        if let Some(pids) = self.pids_limit {
            args.extend(["--pids-limit".to_string(), pids.to_string()]);
        }
        args
    }
}

/// Container executor configuration
#[derive(Debug, Clone, Default)]
pub struct ContainerExecutorConfig {
    pub runtime: ContainerRuntime,
    pub limits: ResourceLimits,
}

/// Executor for [`ExecutionMode::Container`]
pub struct ContainerExecutor {
    process: Arc<ProcessExecutor>,
    config: ContainerExecutorConfig,
}

impl ContainerExecutor {
    pub fn new(process: Arc<ProcessExecutor>, config: ContainerExecutorConfig) -> Self {
        Self { process, config }
    }

    /// Full `docker run` command for one call
    pub fn build_spec(&self, image: &str, params: &RunParams) -> Option<CommandSpec> {
        let profile = self.process.profile(&params.backend)?;

        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if let Some(dir) = &params.working_dir {
            args.extend([
                "-v".to_string(),
                format!("{}:{}", dir.display(), WORKSPACE_MOUNT),
                "-w".to_string(),
                WORKSPACE_MOUNT.to_string(),
            ]);
        }
        args.extend(self.config.limits.to_args());
        args.push(image.to_string());
        args.push(profile.program.clone());
        args.extend(profile.build_args(params));

        Some(CommandSpec {
            identity: format!("container:{}:{}", image, profile.identity),
            program: self.config.runtime.command().to_string(),
            args,
            format: profile.format,
        })
    }

    pub async fn run(&self, image: &str, mut params: RunParams) -> NormalizedResult {
        let Some(spec) = self.build_spec(image, &params) else {
            return NormalizedResult::failure(
                ProcessErrorKind::SpawnError,
                format!("Unknown backend: {}", params.backend),
            );
        };

        // The mount already carries the working directory
        params.working_dir = None;
        self.process.run_spec(spec, params).await
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult> {
        let ExecutionMode::Container { image, backend } = &task.mode else {
            return Err(Error::Task(format!(
                "ContainerExecutor cannot execute {} tasks",
                task.mode.name()
            )));
        };

        let mut params = RunParams::from_task(task, backend);
        params.on_chunk = sink;

        let result = self.run(image, params).await;
        Ok(to_worker_result(&task.id, &result))
    }

    async fn cancel(&self, worker_id: &str) -> Result<bool> {
        Ok(self.process.cancel_run(worker_id))
    }

    fn is_available(&self) -> bool {
        which::which(self.config.runtime.command()).is_ok()
    }

    fn name(&self) -> &'static str {
        "container"
    }
}
