//! Process executor - one backend CLI process per call
//!
//! Features:
//! - Backend-specific argument lists (see [`BackendProfile`])
//! - Sanitized child environment
//! - Per-identity serialization: one in-flight process per backend identity
//! - Chunked stdout streaming to an optional sink
//! - Timeout escalation: SIGTERM, then SIGKILL after the grace window
//! - Best-effort partial parse and failure classification

use super::backend::{BackendProfile, RunParams};
use super::env::EnvSecurityConfig;
use super::output::{
    classify_failure, parse_output, ExitInfo, NormalizedResult, OutputFormat, ProcessError,
    ProcessErrorKind,
};
use super::queue::IdentityQueue;
use super::r#trait::{Executor, OutputSink};
use crate::task::{ExecutionMode, WorkerResult, WorkerTask, DEFAULT_WORKER_TIMEOUT};
use async_trait::async_trait;
use conductor_foundation::{Error, ProcessSettings, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Readers get this long to drain after the process is gone
const READER_DRAIN: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

// ============================================================================
// Configuration
// ============================================================================

/// Process executor configuration
#[derive(Debug, Clone)]
pub struct ProcessExecutorConfig {
    /// Used when a call does not carry its own timeout
    pub default_timeout: Duration,
    /// SIGTERM to SIGKILL window
    pub kill_grace: Duration,
    pub env: EnvSecurityConfig,
    /// Backend profiles by identity
    pub profiles: HashMap<String, BackendProfile>,
}

impl Default for ProcessExecutorConfig {
    fn default() -> Self {
        let profiles = [BackendProfile::claude(), BackendProfile::codex()]
            .into_iter()
            .map(|p| (p.identity.clone(), p))
            .collect();

        Self {
            default_timeout: DEFAULT_WORKER_TIMEOUT,
            kill_grace: Duration::from_secs(10),
            env: EnvSecurityConfig::default(),
            profiles,
        }
    }
}

impl From<&ProcessSettings> for ProcessExecutorConfig {
    fn from(settings: &ProcessSettings) -> Self {
        Self {
            default_timeout: Duration::from_secs(settings.default_timeout_secs),
            kill_grace: Duration::from_secs(settings.kill_grace_secs),
            env: EnvSecurityConfig::from(settings),
            ..Self::default()
        }
    }
}

impl ProcessExecutorConfig {
    pub fn with_profile(mut self, profile: BackendProfile) -> Self {
        self.profiles.insert(profile.identity.clone(), profile);
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// A fully resolved command line
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Serialization key
    pub identity: String,
    pub program: String,
    pub args: Vec<String>,
    pub format: OutputFormat,
}

impl CommandSpec {
    /// Command line for logs, shell-quoted
    pub fn display(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts).unwrap_or_else(|_| self.program.clone())
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[derive(Default)]
struct CancelHandle {
    requested: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // Stores a permit if the run is not waiting yet
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Removes the run from the cancel map when the call ends or is dropped
struct RunRegistration<'a> {
    running: &'a Mutex<HashMap<String, Arc<CancelHandle>>>,
    run_id: Option<String>,
}

impl Drop for RunRegistration<'_> {
    fn drop(&mut self) {
        if let Some(run_id) = self.run_id.take() {
            self.running.lock().remove(&run_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exited,
    TimedOut,
    Cancelled,
}

// ============================================================================
// Executor
// ============================================================================

/// Spawn-based executor for one-shot backend CLIs
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,
    queue: IdentityQueue,
    running: Mutex<HashMap<String, Arc<CancelHandle>>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::with_config(ProcessExecutorConfig::default())
    }

    pub fn with_config(config: ProcessExecutorConfig) -> Self {
        Self {
            config,
            queue: IdentityQueue::new(),
            running: Mutex::new(HashMap::with_capacity(8)),
        }
    }

    pub fn config(&self) -> &ProcessExecutorConfig {
        &self.config
    }

    pub fn profile(&self, identity: &str) -> Option<&BackendProfile> {
        self.config.profiles.get(identity)
    }

    /// Runs currently registered for cancellation
    pub fn running_ids(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }

    /// Identities with a call in flight or waiting
    pub fn busy_identities(&self) -> usize {
        self.queue.active_identities()
    }

    /// Run one backend call
    pub async fn run(&self, params: RunParams) -> NormalizedResult {
        let Some(profile) = self.profile(&params.backend) else {
            return NormalizedResult::failure(
                ProcessErrorKind::SpawnError,
                format!("Unknown backend: {}", params.backend),
            );
        };

        let spec = CommandSpec {
            identity: profile.identity.clone(),
            program: profile.program.clone(),
            args: profile.build_args(&params),
            format: profile.format,
        };
        self.run_spec(spec, params).await
    }

    /// Run an explicit command line under the identity queue
    pub async fn run_spec(&self, spec: CommandSpec, params: RunParams) -> NormalizedResult {
        let handle = Arc::new(CancelHandle::default());
        let _registration = self.register(params.run_id.clone(), &handle);

        let identity = spec.identity.clone();
        self.queue
            .run_exclusive(&identity, self.spawn_and_wait(spec, params, handle))
            .await
    }

    /// Request cancellation of a run; `false` if the id is unknown
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.running.lock().get(run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, run_id: Option<String>, handle: &Arc<CancelHandle>) -> RunRegistration<'_> {
        if let Some(id) = &run_id {
            self.running.lock().insert(id.clone(), Arc::clone(handle));
        }
        RunRegistration {
            running: &self.running,
            run_id,
        }
    }

    async fn spawn_and_wait(
        &self,
        spec: CommandSpec,
        params: RunParams,
        cancel: Arc<CancelHandle>,
    ) -> NormalizedResult {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return NormalizedResult::failure(ProcessErrorKind::Killed, "Cancelled before start");
        }

        let program = match which::which(&spec.program) {
            Ok(path) => path,
            Err(e) => {
                warn!(backend = %spec.identity, program = %spec.program, "Executable not found: {}", e);
                return NormalizedResult::failure(
                    ProcessErrorKind::SpawnError,
                    format!("{} not found: {}", spec.program, e),
                );
            }
        };

        let timeout = if params.timeout.is_zero() {
            self.config.default_timeout
        } else {
            params.timeout
        };

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear()
            .envs(self.config.env.sanitized_env());

        // Own process group so escalation reaches grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }

        debug!(backend = %spec.identity, timeout_ms = timeout.as_millis() as u64, "Spawning: {}", spec.display());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(backend = %spec.identity, "Failed to spawn process: {}", e);
                let mut result = NormalizedResult::failure(
                    ProcessErrorKind::SpawnError,
                    format!("Failed to spawn {}: {}", spec.program, e),
                );
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, Arc::clone(&stdout_buf), params.on_chunk.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, Arc::clone(&stderr_buf), None)));

        let (status, termination) = self.supervise(&mut child, timeout, &cancel, &spec.identity).await;

        for handle in [stdout_task, stderr_task].into_iter().flatten() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(READER_DRAIN, handle).await.is_err() {
                // Something outside our group still holds the pipe
                abort.abort();
            }
        }

        let stdout = std::mem::take(&mut *stdout_buf.lock());
        let stderr = std::mem::take(&mut *stderr_buf.lock());

        let result = self.finish(&spec, status, termination, &stdout, &stderr, started.elapsed());
        info!(
            backend = %spec.identity,
            success = result.success,
            duration_ms = result.duration_ms,
            "Process finished"
        );
        result
    }

    /// Wait for exit, escalating on timeout or cancel
    async fn supervise(
        &self,
        child: &mut Child,
        timeout: Duration,
        cancel: &CancelHandle,
        identity: &str,
    ) -> (Option<ExitStatus>, Termination) {
        let termination = tokio::select! {
            status = child.wait() => {
                return (status.ok(), Termination::Exited);
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(backend = %identity, "Timeout ({:.1}s) - sending SIGTERM", timeout.as_secs_f64());
                Termination::TimedOut
            }
            _ = cancel.notify.notified() => {
                info!(backend = %identity, "Cancel requested - sending SIGTERM");
                Termination::Cancelled
            }
        };

        send_signal(child, Signal::Term);

        let status = tokio::select! {
            status = child.wait() => status.ok(),
            _ = tokio::time::sleep(self.config.kill_grace) => {
                warn!(
                    backend = %identity,
                    "Still running {:.1}s after SIGTERM - killing",
                    self.config.kill_grace.as_secs_f64()
                );
                send_signal(child, Signal::Kill);
                if let Err(e) = child.start_kill() {
                    debug!("start_kill after SIGKILL: {}", e);
                }
                child.wait().await.ok()
            }
        };

        (status, termination)
    }

    fn finish(
        &self,
        spec: &CommandSpec,
        status: Option<ExitStatus>,
        termination: Termination,
        stdout: &str,
        stderr: &str,
        elapsed: Duration,
    ) -> NormalizedResult {
        let code = status.and_then(|s| s.code());
        let elapsed_ms = elapsed.as_millis() as u64;

        let mut result = if termination == Termination::Exited && code == Some(0) {
            match parse_output(spec.format, stdout) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let mut result = NormalizedResult::failure(ProcessErrorKind::ParseError, e.to_string());
                    result.text = stdout.trim().to_string();
                    result
                }
            }
        } else {
            let exit = ExitInfo {
                code,
                timed_out: termination == Termination::TimedOut,
                cancelled: termination == Termination::Cancelled,
            };
            let kind = classify_failure(&exit, stderr);

            // Keep whatever text and session id made it out
            let mut result = parse_output(spec.format, stdout).unwrap_or_else(|_| NormalizedResult {
                text: stdout.trim().to_string(),
                ..Default::default()
            });
            result.success = false;
            result.timed_out = exit.timed_out;
            result.error = Some(ProcessError::new(kind, failure_message(&exit, stderr, elapsed)));
            result
        };

        result.exit_code = code;
        if result.duration_ms == 0 {
            result.duration_ms = elapsed_ms;
        }
        if self.config.env.mask_in_output {
            result.text = self.config.env.mask_process_secrets(&result.text);
        }
        result
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_message(exit: &ExitInfo, stderr: &str, elapsed: Duration) -> String {
    if exit.timed_out {
        return format!("Timed out after {:.1}s", elapsed.as_secs_f64());
    }
    if exit.cancelled {
        return "Cancelled".to_string();
    }

    let tail: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = tail[tail.len().saturating_sub(5)..].join("\n");
    match (exit.code, tail.is_empty()) {
        (Some(code), true) => format!("Process exited with code {}", code),
        (None, true) => "Process terminated by signal".to_string(),
        (_, false) => tail,
    }
}

/// Map a normalized result onto the pool's result shape
pub fn to_worker_result(worker_id: &str, result: &NormalizedResult) -> WorkerResult {
    let duration = Duration::from_millis(result.duration_ms);

    if result.success {
        return WorkerResult::completed(worker_id, result.text.clone(), duration)
            .with_exit_code(result.exit_code.or(Some(0)));
    }

    let message = result
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "Backend reported an error".to_string());

    let worker = if result.timed_out {
        WorkerResult::timed_out(worker_id, result.text.clone(), duration)
    } else {
        WorkerResult::failed(worker_id, message.clone())
            .with_output(result.text.clone())
            .with_duration(duration)
    };

    WorkerResult {
        error: Some(message),
        ..worker
    }
    .with_exit_code(result.exit_code)
}

// ============================================================================
// Signals and stream pumping
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: Signal) {
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let signal = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!("Failed to send {} to process group {}: {}", signal, pid, e);
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, signal: Signal) {
    // No graceful signal; the grace window still applies before the hard kill
    if let Signal::Kill = signal {
        let _ = child.start_kill();
    }
}

/// Read a stream to the end, forwarding decoded chunks
async fn pump<R>(mut reader: R, buffer: Arc<Mutex<String>>, sink: Option<OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = take_utf8(&mut pending);
                if text.is_empty() {
                    continue;
                }
                if let Some(sink) = &sink {
                    sink(&text);
                }
                buffer.lock().push_str(&text);
            }
            Err(e) => {
                debug!("Stream read error: {}", e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        if let Some(sink) = &sink {
            sink(&text);
        }
        buffer.lock().push_str(&text);
    }
}

/// Decode the complete prefix, leaving a split multi-byte char for the next read
pub(crate) fn take_utf8(pending: &mut Vec<u8>) -> String {
    let complete = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(complete);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult> {
        let ExecutionMode::Cli { backend } = &task.mode else {
            return Err(Error::Task(format!(
                "ProcessExecutor cannot execute {} tasks",
                task.mode.name()
            )));
        };

        let mut params = RunParams::from_task(task, backend);
        params.on_chunk = sink;

        let result = self.run(params).await;
        Ok(to_worker_result(&task.id, &result))
    }

    async fn cancel(&self, worker_id: &str) -> Result<bool> {
        Ok(self.cancel_run(worker_id))
    }

    fn is_available(&self) -> bool {
        self.config
            .profiles
            .values()
            .any(|p| which::which(&p.program).is_ok())
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
