//! PTY executor - drives interactive agent CLIs through a pseudo-terminal
//!
//! Features:
//! - [`PseudoTerminal`] abstraction (write, output stream, exit, kill)
//! - [`PortablePtyTerminal`] on top of `portable-pty`
//! - [`InteractiveSession`]: one prompt at a time, completion inferred by
//!   the [`CompletionDetector`]
//! - Environment filtering shared with the process executor

use super::backend::{BackendProfile, RunParams};
use super::env::EnvSecurityConfig;
use super::output::{NormalizedResult, ProcessError, ProcessErrorKind};
use super::process::{take_utf8, to_worker_result};
use super::r#trait::{Executor, OutputSink};
use crate::detector::{CompletionDetector, DetectorConfig, DetectorPoll, ProcessingState};
use crate::task::{ExecutionMode, WorkerResult, WorkerTask};
use async_trait::async_trait;
use conductor_foundation::{Error, Result};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest wait between detector polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Submit keystroke, written separately from the prompt text
const SUBMIT: &str = "\r";

// ============================================================================
// Pseudo-terminal abstraction
// ============================================================================

/// A terminal running one interactive program
pub trait PseudoTerminal: Send + Sync {
    /// Write raw input
    fn write(&self, data: &str) -> Result<()>;

    /// Output stream; can be taken once
    fn take_output(&self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// Exit code once the program has ended
    fn exit_status(&self) -> watch::Receiver<Option<i32>>;

    fn kill(&self) -> Result<()>;
}

/// PTY size configuration
#[derive(Debug, Clone, Copy)]
pub struct PtySizeConfig {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySizeConfig {
    fn default() -> Self {
        Self {
            rows: 40,
            cols: 160,
        }
    }
}

/// [`PseudoTerminal`] backed by the native PTY system
pub struct PortablePtyTerminal {
    // Kept alive for the session; dropping it closes the terminal
    _master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    output: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl PortablePtyTerminal {
    /// Spawn `program` on a fresh PTY; must be called inside a tokio runtime
    pub fn spawn(
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
        env: &HashMap<String, String>,
        size: PtySizeConfig,
    ) -> Result<Self> {
        let pty = native_pty_system()
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Process(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let mut child = pty
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Process(format!("Failed to spawn PTY command: {}", e)))?;
        let killer = child.clone_killer();

        let mut reader = pty
            .master
            .try_clone_reader()
            .map_err(|e| Error::Process(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pty
            .master
            .take_writer()
            .map_err(|e| Error::Process(format!("Failed to take PTY writer: {}", e)))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            let mut pending = Vec::new();
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        let text = take_utf8(&mut pending);
                        if !text.is_empty() && out_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            };
            let _ = exit_tx.send(Some(code));
        });

        Ok(Self {
            _master: Mutex::new(pty.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            output: Mutex::new(Some(out_rx)),
            exit_rx,
        })
    }
}

impl PseudoTerminal for PortablePtyTerminal {
    fn write(&self, data: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn take_output(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.lock().take()
    }

    fn exit_status(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    fn kill(&self) -> Result<()> {
        self.killer
            .lock()
            .kill()
            .map_err(|e| Error::Process(format!("Failed to kill PTY process: {}", e)))
    }
}

// ============================================================================
// Interactive session
// ============================================================================

/// Outcome of one prompt
#[derive(Debug, Clone, PartialEq)]
pub struct PromptOutcome {
    pub text: String,
    pub timed_out: bool,
    /// The program ended before an answer was detected
    pub exited: Option<i32>,
    pub duration: Duration,
}

/// One terminal plus at most one in-flight prompt
pub struct InteractiveSession {
    terminal: Arc<dyn PseudoTerminal>,
    detector: CompletionDetector,
    // Holding this lock is what makes a prompt "in flight"
    output: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    exit: watch::Receiver<Option<i32>>,
    /// Receives cleaned output while a prompt is in flight
    sink: Option<OutputSink>,
}

impl InteractiveSession {
    pub fn new(terminal: Arc<dyn PseudoTerminal>, config: DetectorConfig) -> Result<Self> {
        let output = terminal
            .take_output()
            .ok_or_else(|| Error::Task("Terminal output already taken".to_string()))?;
        let exit = terminal.exit_status();

        Ok(Self {
            terminal,
            detector: CompletionDetector::new(config),
            output: tokio::sync::Mutex::new(output),
            exit,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn forward(&self, chunk: &str) {
        if let Some(sink) = &self.sink {
            let cleaned = crate::detector::extract::clean(chunk);
            if !cleaned.trim().is_empty() {
                sink(&cleaned);
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.output.try_lock().is_err()
    }

    pub fn terminal(&self) -> &Arc<dyn PseudoTerminal> {
        &self.terminal
    }

    /// Consume start-up output until the program shows an idle prompt
    pub async fn wait_ready(&self, timeout: Duration) -> Result<bool> {
        let mut output = self
            .output
            .try_lock()
            .map_err(|_| Error::Task("A prompt is already in flight".to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut seen = String::new();
        loop {
            let tail = crate::detector::patterns::tail(&crate::detector::extract::clean(&seen));
            if crate::detector::patterns::is_idle_tail(&tail) {
                return Ok(true);
            }

            tokio::select! {
                chunk = output.recv() => match chunk {
                    Some(chunk) => seen.push_str(&chunk),
                    None => return Ok(false),
                },
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
            }
        }
    }

    /// Send a prompt and wait for the answer
    ///
    /// A second call while one is in flight fails with [`Error::Task`].
    pub async fn send_prompt(&self, prompt: &str, timeout: Duration) -> Result<PromptOutcome> {
        let mut output = self
            .output
            .try_lock()
            .map_err(|_| Error::Task("A prompt is already in flight".to_string()))?;

        // Leftovers belong to the previous prompt
        while output.try_recv().is_ok() {}

        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = ProcessingState::new(prompt, started);

        self.terminal.write(prompt)?;
        tokio::time::sleep(self.detector.config().submit_delay).await;
        self.terminal.write(SUBMIT)?;
        state.mark_submitted(Instant::now());

        let mut exit = self.exit.clone();
        let outcome = |text: String, timed_out: bool, exited: Option<i32>| PromptOutcome {
            text,
            timed_out,
            exited,
            duration: started.elapsed(),
        };

        loop {
            let exited = *exit.borrow();
            if let Some(code) = exited {
                // Take what is still queued before giving up
                while let Ok(chunk) = output.try_recv() {
                    self.forward(&chunk);
                    self.detector.on_output(&mut state, &chunk, Instant::now());
                }
                return Ok(outcome(self.detector.finalize(&state), false, Some(code)));
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, "Prompt timed out");
                return Ok(outcome(self.detector.finalize(&state), true, None));
            }

            let wake = match self.detector.poll(&mut state, now) {
                DetectorPoll::Complete(text) => {
                    debug!(chars = text.len(), "Prompt complete");
                    return Ok(outcome(text, false, None));
                }
                DetectorPoll::Pending(next) => next
                    .unwrap_or(now + POLL_INTERVAL)
                    .min(now + POLL_INTERVAL)
                    .min(deadline),
            };

            tokio::select! {
                chunk = output.recv() => match chunk {
                    Some(chunk) => {
                        self.forward(&chunk);
                        self.detector.on_output(&mut state, &chunk, Instant::now());
                    }
                    None => {
                        let code = (*exit.borrow()).unwrap_or(-1);
                        return Ok(outcome(self.detector.finalize(&state), false, Some(code)));
                    }
                },
                changed = exit.changed() => {
                    if changed.is_err() {
                        return Ok(outcome(self.detector.finalize(&state), false, Some(-1)));
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// PTY executor configuration
#[derive(Debug, Clone)]
pub struct PtyExecutorConfig {
    pub detector: DetectorConfig,
    pub pty_size: PtySizeConfig,
    pub env_security: EnvSecurityConfig,
    /// How long the program gets to show its first prompt
    pub startup_timeout: Duration,
    pub profiles: HashMap<String, BackendProfile>,
}

impl Default for PtyExecutorConfig {
    fn default() -> Self {
        let profiles = [BackendProfile::claude(), BackendProfile::codex()]
            .into_iter()
            .map(|p| (p.identity.clone(), p))
            .collect();

        Self {
            detector: DetectorConfig::default(),
            pty_size: PtySizeConfig::default(),
            env_security: EnvSecurityConfig::default(),
            startup_timeout: Duration::from_secs(30),
            profiles,
        }
    }
}

/// Executor for [`ExecutionMode::Terminal`]: one session per worker task
pub struct PtyExecutor {
    config: PtyExecutorConfig,
    sessions: Mutex<HashMap<String, Arc<dyn PseudoTerminal>>>,
}

impl PtyExecutor {
    pub fn new() -> Self {
        Self::with_config(PtyExecutorConfig::default())
    }

    pub fn with_config(config: PtyExecutorConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Workers with a live terminal
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Run one prompt on an already spawned terminal, streaming its output to `sink`
    pub async fn run_on(
        &self,
        terminal: Arc<dyn PseudoTerminal>,
        prompt: &str,
        timeout: Duration,
        sink: Option<OutputSink>,
    ) -> Result<NormalizedResult> {
        let mut session = InteractiveSession::new(terminal, self.config.detector)?;
        if let Some(sink) = sink {
            session = session.with_sink(self.masked(sink));
        }

        if !session.wait_ready(self.config.startup_timeout).await? {
            debug!("No idle prompt before start-up timeout, sending anyway");
        }

        let outcome = session.send_prompt(prompt, timeout).await?;
        Ok(outcome_to_result(outcome))
    }

    fn masked(&self, sink: OutputSink) -> OutputSink {
        if !self.config.env_security.mask_in_output {
            return sink;
        }
        let security = self.config.env_security.clone();
        Arc::new(move |chunk: &str| sink(&security.mask_process_secrets(chunk)))
    }

    fn spawn_terminal(&self, task: &WorkerTask, backend: &str) -> Result<Arc<dyn PseudoTerminal>> {
        let profile = self
            .config
            .profiles
            .get(backend)
            .ok_or_else(|| Error::NotFound(format!("Unknown backend: {}", backend)))?;
        let program = which::which(&profile.program)
            .map_err(|e| Error::Process(format!("{} not found: {}", profile.program, e)))?;

        let params = RunParams::from_task(task, backend);
        let terminal = PortablePtyTerminal::spawn(
            &program,
            &profile.interactive_args(&params),
            Some(task.working_dir.as_path()),
            &self.config.env_security.sanitized_env(),
            self.config.pty_size,
        )?;
        Ok(Arc::new(terminal))
    }
}

impl Default for PtyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_to_result(outcome: PromptOutcome) -> NormalizedResult {
    let duration_ms = outcome.duration.as_millis() as u64;

    let error = if outcome.timed_out {
        Some(ProcessError::new(
            ProcessErrorKind::Timeout,
            format!("No completion after {:.1}s", outcome.duration.as_secs_f64()),
        ))
    } else {
        outcome.exited.map(|code| {
            ProcessError::new(
                ProcessErrorKind::Killed,
                format!("Terminal program exited with code {}", code),
            )
        })
    };

    NormalizedResult {
        success: error.is_none(),
        text: outcome.text,
        duration_ms,
        turns: 1,
        timed_out: outcome.timed_out,
        exit_code: outcome.exited,
        error,
        ..Default::default()
    }
}

#[async_trait]
impl Executor for PtyExecutor {
    async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult> {
        let ExecutionMode::Terminal { backend } = &task.mode else {
            return Err(Error::Task(format!(
                "PtyExecutor cannot execute {} tasks",
                task.mode.name()
            )));
        };

        let terminal = match self.spawn_terminal(task, backend) {
            Ok(terminal) => terminal,
            Err(e) => {
                let result = NormalizedResult::failure(ProcessErrorKind::SpawnError, e.to_string());
                return Ok(to_worker_result(&task.id, &result));
            }
        };
        self.sessions.lock().insert(task.id.clone(), Arc::clone(&terminal));
        info!(worker_id = %task.id, backend = %backend, "Terminal session started");

        let result = self
            .run_on(Arc::clone(&terminal), &task.prompt, task.timeout(), sink)
            .await;

        self.sessions.lock().remove(&task.id);
        if let Err(e) = terminal.kill() {
            debug!(worker_id = %task.id, "Terminal already gone: {}", e);
        }

        let mut result = result?;
        if self.config.env_security.mask_in_output {
            result.text = self.config.env_security.mask_process_secrets(&result.text);
        }
        Ok(to_worker_result(&task.id, &result))
    }

    async fn cancel(&self, worker_id: &str) -> Result<bool> {
        let terminal = self.sessions.lock().get(worker_id).cloned();
        match terminal {
            Some(terminal) => {
                terminal.kill()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_available(&self) -> bool {
        self.config
            .profiles
            .values()
            .any(|p| which::which(&p.program).is_ok())
    }

    fn name(&self) -> &'static str {
        "pty"
    }
}
