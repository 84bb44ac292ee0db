//! Worker pool end to end - pool, strategies and the spawn executor
//! driving a stand-in backend script

#![cfg(unix)]

use conductor_foundation::{EventBus, Result};
use conductor_task::{
    run_strategy, BackendProfile, ExecutionMode, ExecutionStrategy, Executor, ExecutorFactory,
    ProcessExecutor, ProcessExecutorConfig, WorkerPool, WorkerPoolConfig, WorkerStatus, WorkerTask,
};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

/// Prints a Format A object whose result is the last argument (the prompt)
const FAKE_BACKEND: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  *explode*) echo "api error: overloaded" >&2; exit 2 ;;
esac
printf '{"result":"done: %s","session_id":"s-1","is_error":false,"num_turns":1,"usage":{"input_tokens":4,"output_tokens":6}}\n' "$last"
"#;

struct CliOnlyFactory(Arc<ProcessExecutor>);

impl ExecutorFactory for CliOnlyFactory {
    fn executor_for(&self, _mode: &ExecutionMode) -> Result<Arc<dyn Executor>> {
        Ok(self.0.clone())
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        vec![self.0.clone()]
    }
}

fn install_backend(dir: &Path) -> String {
    let path = dir.join("fake-backend");
    std::fs::write(&path, FAKE_BACKEND).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn pool(program: String, max_concurrency: usize) -> WorkerPool {
    let profile = BackendProfile::claude()
        .with_identity("fake")
        .with_program(program);
    let executor = ProcessExecutor::with_config(ProcessExecutorConfig::default().with_profile(profile));

    WorkerPool::new(
        WorkerPoolConfig {
            max_concurrency,
            queue_capacity: 10,
        },
        Arc::new(CliOnlyFactory(Arc::new(executor))),
        Arc::new(EventBus::new()),
    )
}

fn task(id: &str, prompt: &str) -> WorkerTask {
    WorkerTask::new(prompt)
        .with_id(id)
        .with_mode(ExecutionMode::cli("fake"))
}

#[tokio::test]
async fn test_parallel_over_capacity_queues_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(install_backend(dir.path()), 1);
    let mut rx = pool.events().receiver();

    let tasks = vec![task("w-1", "alpha"), task("w-2", "explode"), task("w-3", "gamma")];
    let results = run_strategy(&pool, ExecutionStrategy::Parallel, tasks, None).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].output, "done: alpha");
    assert_eq!(results[1].status, WorkerStatus::Failed);
    assert!(results[1].error.as_deref().unwrap().starts_with("api_error"));
    assert_eq!(results[2].output, "done: gamma");

    let mut queued = 0;
    let mut done = 0;
    while let Ok(event) = rx.try_recv() {
        if event.is("worker.queued") {
            queued += 1;
        } else if event.is("worker.done") {
            done += 1;
        }
    }
    assert_eq!(queued, 2);
    assert_eq!(done, 3);

    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!((stats.completed, stats.failed), (2, 1));
}

#[tokio::test]
async fn test_sequential_dependency_on_failed_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(install_backend(dir.path()), 2);

    let tasks = vec![
        task("build", "explode"),
        task("test", "run tests").with_dependencies(vec!["build".into()]),
    ];
    let results = run_strategy(&pool, ExecutionStrategy::Sequential, tasks, None).await;

    assert_eq!(results[0].status, WorkerStatus::Failed);
    assert_eq!(results[1].status, WorkerStatus::Failed);
    assert!(results[1].error.as_deref().unwrap().contains("build"));
}
