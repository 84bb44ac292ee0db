//! Execution-mode to executor mapping

use super::api::{ApiExecutor, ApiExecutorConfig};
use super::container::{ContainerExecutor, ContainerExecutorConfig};
use super::process::{ProcessExecutor, ProcessExecutorConfig};
use super::pty::{PtyExecutor, PtyExecutorConfig};
use super::r#trait::Executor;
use crate::detector::DetectorConfig;
use crate::task::ExecutionMode;
use conductor_foundation::{ConductorConfig, Result};
use std::sync::Arc;

/// Picks the executor for a task's execution mode
pub trait ExecutorFactory: Send + Sync {
    fn executor_for(&self, mode: &ExecutionMode) -> Result<Arc<dyn Executor>>;

    /// Every executor this factory hands out, for broadcast cancel
    fn executors(&self) -> Vec<Arc<dyn Executor>>;
}

/// Built-in executors, one shared instance per mode
pub struct DefaultExecutorFactory {
    process: Arc<ProcessExecutor>,
    api: Arc<ApiExecutor>,
    pty: Arc<PtyExecutor>,
    container: Arc<ContainerExecutor>,
}

impl DefaultExecutorFactory {
    pub fn new(config: &ConductorConfig) -> Self {
        let process = Arc::new(ProcessExecutor::with_config(ProcessExecutorConfig::from(
            &config.process,
        )));

        let pty_config = PtyExecutorConfig {
            detector: DetectorConfig::from(&config.detector),
            env_security: process.config().env.clone(),
            ..Default::default()
        };

        Self {
            api: Arc::new(ApiExecutor::new(ApiExecutorConfig::from(&config.api))),
            pty: Arc::new(PtyExecutor::with_config(pty_config)),
            container: Arc::new(ContainerExecutor::new(
                Arc::clone(&process),
                ContainerExecutorConfig::default(),
            )),
            process,
        }
    }

    pub fn process(&self) -> &Arc<ProcessExecutor> {
        &self.process
    }
}

impl Default for DefaultExecutorFactory {
    fn default() -> Self {
        Self::new(&ConductorConfig::default())
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn executor_for(&self, mode: &ExecutionMode) -> Result<Arc<dyn Executor>> {
        let executor: Arc<dyn Executor> = match mode {
            ExecutionMode::Cli { .. } => self.process.clone(),
            ExecutionMode::Api => self.api.clone(),
            ExecutionMode::Terminal { .. } => self.pty.clone(),
            ExecutionMode::Container { .. } => self.container.clone(),
        };
        Ok(executor)
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        let process: Arc<dyn Executor> = self.process.clone();
        let api: Arc<dyn Executor> = self.api.clone();
        let pty: Arc<dyn Executor> = self.pty.clone();
        let container: Arc<dyn Executor> = self.container.clone();
        vec![process, api, pty, container]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mapping() {
        let factory = DefaultExecutorFactory::default();

        let cases = [
            (ExecutionMode::cli("claude"), "process"),
            (ExecutionMode::Api, "api"),
            (ExecutionMode::terminal("codex"), "pty"),
            (
                ExecutionMode::Container {
                    image: "node:20".into(),
                    backend: "claude".into(),
                },
                "container",
            ),
        ];
        for (mode, name) in cases {
            assert_eq!(factory.executor_for(&mode).unwrap().name(), name);
        }
        assert_eq!(factory.executors().len(), 4);
    }
}
