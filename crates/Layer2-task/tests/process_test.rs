//! Process executor integration tests - real `sh` children
//!
//! `cargo test -p conductor-task --test process_test`

#![cfg(unix)]

use conductor_task::{
    CommandSpec, NormalizedResult, OutputFormat, OutputSink, ProcessErrorKind, ProcessExecutor,
    ProcessExecutorConfig, RunParams,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sh(identity: &str, script: &str) -> CommandSpec {
    CommandSpec {
        identity: identity.to_string(),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        format: OutputFormat::Json,
    }
}

fn executor(kill_grace: Duration) -> Arc<ProcessExecutor> {
    Arc::new(ProcessExecutor::with_config(
        ProcessExecutorConfig::default().with_kill_grace(kill_grace),
    ))
}

const FORMAT_A: &str = r#"{"result":"hello","session_id":"sess-1","is_error":false,"total_cost_usd":0.01,"num_turns":1,"duration_ms":7,"usage":{"input_tokens":3,"output_tokens":2}}"#;

#[tokio::test]
async fn test_sigterm_ignored_then_sigkill() {
    let executor = executor(Duration::from_millis(300));
    let spec = sh("stubborn", "trap '' TERM; echo partial; sleep 60");
    let params = RunParams::new("stubborn", "").with_timeout(Duration::from_millis(500));

    let started = Instant::now();
    let result = executor.run_spec(spec, params).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    assert!(result.timed_out);
    assert_eq!(result.error_kind(), Some(ProcessErrorKind::Timeout));
    assert_eq!(result.text, "partial");
}

#[tokio::test]
async fn test_stdout_streamed_and_parsed() {
    let executor = executor(Duration::from_secs(1));
    let chunks = Arc::new(Mutex::new(String::new()));
    let sink: OutputSink = {
        let chunks = Arc::clone(&chunks);
        Arc::new(move |chunk: &str| chunks.lock().push_str(chunk))
    };

    let script = format!("echo 'warming up' >&2; echo '{}'", FORMAT_A);
    let params = RunParams::new("echo", "").with_sink(sink);
    let result = executor.run_spec(sh("echo", &script), params).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.text, "hello");
    assert_eq!(result.session_id.as_deref(), Some("sess-1"));
    assert_eq!(result.usage.total(), 5);
    assert_eq!(result.exit_code, Some(0));
    assert!(chunks.lock().contains("\"result\":\"hello\""));
}

#[tokio::test]
async fn test_nonzero_exit_keeps_partial_output() {
    let executor = executor(Duration::from_secs(1));
    let script = format!("echo '{}'; echo 'permission denied' >&2; exit 3", FORMAT_A);
    let result = executor
        .run_spec(sh("partial", &script), RunParams::new("partial", ""))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.session_id.as_deref(), Some("sess-1"));
    assert_eq!(result.error_kind(), Some(ProcessErrorKind::PermissionDenied));
}

#[tokio::test]
async fn test_same_identity_runs_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let script = format!(
        "echo start >> '{log}'; sleep 0.2; echo end >> '{log}'",
        log = log.display()
    );

    let executor = executor(Duration::from_secs(1));
    let runs: Vec<_> = (0..3)
        .map(|_| {
            let executor = Arc::clone(&executor);
            let spec = sh("shared", &script);
            tokio::spawn(async move { executor.run_spec(spec, RunParams::new("shared", "")).await })
        })
        .collect();

    for run in runs {
        let _: NormalizedResult = run.await.unwrap();
    }

    let lines: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, ["start", "end", "start", "end", "start", "end"]);
    assert_eq!(executor.busy_identities(), 0);
}

#[tokio::test]
async fn test_cancel_running_process() {
    let executor = executor(Duration::from_millis(200));
    let mut params = RunParams::new("long", "");
    params.run_id = Some("w-cancel".to_string());

    let handle = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run_spec(sh("long", "sleep 60"), params).await }
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !executor.running_ids().contains(&"w-cancel".to_string()) {
        assert!(Instant::now() < deadline, "run never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(executor.cancel_run("w-cancel"));
    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ProcessErrorKind::Killed));
    assert!(!executor.cancel_run("w-cancel"));
}

#[tokio::test]
async fn test_missing_executable_is_spawn_error() {
    let executor = executor(Duration::from_secs(1));
    let spec = CommandSpec {
        identity: "ghost".to_string(),
        program: "conductor-no-such-binary".to_string(),
        args: Vec::new(),
        format: OutputFormat::JsonLines,
    };

    let result = executor.run_spec(spec, RunParams::new("ghost", "")).await;
    assert_eq!(result.error_kind(), Some(ProcessErrorKind::SpawnError));
}
