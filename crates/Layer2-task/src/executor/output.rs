//! Backend output normalization
//!
//! Two wire formats are understood:
//!
//! - **Format A** (`OutputFormat::Json`): one JSON object
//!   `{result, session_id, is_error, total_cost_usd, num_turns, duration_ms,
//!   duration_api_ms, usage:{input_tokens, output_tokens,
//!   cache_creation_input_tokens?, cache_read_input_tokens?}}`
//! - **Format B** (`OutputFormat::JsonLines`): newline-delimited events,
//!   `thread.started` (thread id), `item.completed` with an `agent_message`
//!   item (text fragments joined by `\n`), `turn.completed` (usage, summed).
//!   Lines that do not parse are skipped.
//!
//! Both produce a [`NormalizedResult`].

use conductor_foundation::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ============================================================================
// Normalized result
// ============================================================================

/// Failure taxonomy for process-backed calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    Timeout,
    SessionNotFound,
    PermissionDenied,
    /// Rate limit or overload reported by the backend
    ApiError,
    /// Executable missing or not startable
    SpawnError,
    /// Terminated by a signal we did not send for a timeout
    Killed,
    /// Output matched neither wire format
    ParseError,
    Unknown,
}

impl ProcessErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::SessionNotFound => "session_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ApiError => "api_error",
            Self::SpawnError => "spawn_error",
            Self::Killed => "killed",
            Self::ParseError => "parse_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessError {
    pub kind: ProcessErrorKind,
    pub message: String,
}

impl ProcessError {
    pub fn new(kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_create: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_create += other.cache_create;
        self.cache_read += other.cache_read;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_create + self.cache_read
    }
}

/// Backend-independent result of one backend call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub success: bool,
    pub text: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub turns: u32,
    pub error: Option<ProcessError>,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

impl NormalizedResult {
    /// Failed result with nothing parsed
    pub fn failure(kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            timed_out: kind == ProcessErrorKind::Timeout,
            error: Some(ProcessError::new(kind, message)),
            ..Default::default()
        }
    }

    pub fn error_kind(&self) -> Option<ProcessErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Wire format a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Format A
    Json,
    /// Format B
    JsonLines,
}

/// Parse captured stdout in the given format
pub fn parse_output(format: OutputFormat, stdout: &str) -> Result<NormalizedResult> {
    match format {
        OutputFormat::Json => parse_json_result(stdout),
        OutputFormat::JsonLines => parse_event_stream(stdout),
    }
}

// ============================================================================
// Format A
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonResult {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    num_turns: Option<u32>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    duration_api_ms: Option<u64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: JsonUsage,
}

#[derive(Debug, Default, Deserialize)]
struct JsonUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

/// Format A. Falls back to the last line holding a JSON object when the
/// stream has diagnostics around it.
pub fn parse_json_result(stdout: &str) -> Result<NormalizedResult> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(Error::Parse("empty output".to_string()));
    }

    let parsed: JsonResult = match serde_json::from_str(trimmed) {
        Ok(parsed) => parsed,
        Err(whole_err) => trimmed
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| Error::Parse(format!("not a JSON result object: {}", whole_err)))?,
    };

    let usage = TokenUsage {
        input: parsed.usage.input_tokens,
        output: parsed.usage.output_tokens,
        cache_create: parsed.usage.cache_creation_input_tokens.unwrap_or(0),
        cache_read: parsed.usage.cache_read_input_tokens.unwrap_or(0),
    };

    let text = parsed.result.unwrap_or_default();
    let error = parsed
        .is_error
        .then(|| ProcessError::new(classify_text(&text), text.clone()));

    Ok(NormalizedResult {
        success: !parsed.is_error,
        text,
        session_id: parsed.session_id,
        model: parsed.model,
        usage,
        cost_usd: parsed.total_cost_usd.unwrap_or(0.0),
        duration_ms: parsed.duration_ms.unwrap_or(0),
        turns: parsed.num_turns.unwrap_or(0),
        error,
        timed_out: false,
        exit_code: None,
    })
}

// ============================================================================
// Format B
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: StreamItem },

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: StreamUsage,
    },

    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<StreamError>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: Option<String>,
}

/// Format B
pub fn parse_event_stream(stdout: &str) -> Result<NormalizedResult> {
    let mut result = NormalizedResult {
        success: true,
        ..Default::default()
    };
    let mut fragments: Vec<String> = Vec::new();
    let mut recognized = 0usize;
    let mut failure: Option<String> = None;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(_) => continue,
        };
        recognized += 1;

        match event {
            StreamEvent::ThreadStarted { thread_id } => result.session_id = Some(thread_id),
            StreamEvent::ItemCompleted { item } => {
                if item.kind == "agent_message" {
                    if let Some(text) = item.text {
                        fragments.push(text);
                    }
                }
            }
            StreamEvent::TurnCompleted { usage } => {
                result.turns += 1;
                result.usage.add(&TokenUsage {
                    input: usage.input_tokens,
                    output: usage.output_tokens,
                    cache_create: 0,
                    cache_read: usage.cached_input_tokens,
                });
            }
            StreamEvent::TurnFailed { error } => {
                failure = Some(
                    error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "turn failed".to_string()),
                );
            }
            StreamEvent::Error { message } => {
                failure = Some(message.unwrap_or_else(|| "backend error".to_string()));
            }
            StreamEvent::Other => {}
        }
    }

    if recognized == 0 {
        return Err(Error::Parse("no structured events in output".to_string()));
    }

    result.text = fragments.join("\n");
    if let Some(message) = failure {
        result.success = false;
        result.error = Some(ProcessError::new(classify_text(&message), message));
    }

    Ok(result)
}

// ============================================================================
// Failure classification
// ============================================================================

/// How the process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminated by our timeout escalation
    pub timed_out: bool,
    /// Terminated by an explicit cancel
    pub cancelled: bool,
}

/// Classify a failed run: exit code first, then the timeout flag, then stderr
pub fn classify_failure(exit: &ExitInfo, stderr: &str) -> ProcessErrorKind {
    match exit.code {
        Some(127) => return ProcessErrorKind::SpawnError,
        Some(126) => return ProcessErrorKind::PermissionDenied,
        _ => {}
    }

    if exit.timed_out {
        return ProcessErrorKind::Timeout;
    }

    if exit.cancelled || exit.code.is_none() {
        return ProcessErrorKind::Killed;
    }

    classify_text(stderr)
}

fn stderr_patterns() -> &'static [(Regex, ProcessErrorKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, ProcessErrorKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"no conversation found|session\s+(not found|does not exist)|invalid session",
                ProcessErrorKind::SessionNotFound,
            ),
            (
                r"permission denied|\beacces\b|operation not permitted|unauthorized|\b40[13]\b",
                ProcessErrorKind::PermissionDenied,
            ),
            (
                r"rate.?limit|\b429\b|overloaded|\b529\b|api error|service unavailable",
                ProcessErrorKind::ApiError,
            ),
            (
                r"\benoent\b|command not found|no such file or directory",
                ProcessErrorKind::SpawnError,
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, kind)| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
                .map(|re| (re, kind))
        })
        .collect()
    })
}

/// Classify free text (stderr, backend error message)
pub fn classify_text(text: &str) -> ProcessErrorKind {
    stderr_patterns()
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, kind)| *kind)
        .unwrap_or(ProcessErrorKind::Unknown)
}
