//! Completion detection for interactive terminal sessions
//!
//! An interactive agent never exits between prompts, so "done" has to be
//! inferred from what it prints. The detector is a pure state machine:
//! callers feed output chunks with [`CompletionDetector::on_output`] and
//! ask [`CompletionDetector::poll`] whether the answer is ready. Time is
//! always passed in, which keeps the rules testable without real clocks.
//!
//! ```text
//!  chunk ──► background activity? ──yes──► flag + cancel settle
//!              │ no
//!              ▼
//!         idle prompt in tail? ──no──► cancel settle
//!              │ yes
//!              ▼
//!   floors clear (min execution, cooldown)? ──no──► re-checked on poll
//!              │ yes
//!              ▼
//!         arm settle (if not armed) ──► settle elapsed ──► extract
//!                                                           │
//!                            short answer + background ◄────┤
//!                            (defer until new output)       ▼
//!                                                        complete
//! ```

pub mod extract;
pub mod patterns;

pub use extract::{extract_response, ExtractOptions, GARBLED_PLACEHOLDER, RESPONSE_MARKER};

use conductor_foundation::DetectorSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Detector timing and extraction settings
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Quiet period after an idle match
    pub settle: Duration,
    /// Idle matches before this are not honored
    pub min_execution: Duration,
    /// Idle matches are ignored this long after background activity
    pub background_cooldown: Duration,
    /// Delay between prompt text and the submit keystroke
    pub submit_delay: Duration,
    pub max_output_chars: usize,
    /// Shorter answers are deferred while background work was seen
    pub short_result_chars: usize,
    pub garbled_detection: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from(&DetectorSettings::default())
    }
}

impl From<&DetectorSettings> for DetectorConfig {
    fn from(settings: &DetectorSettings) -> Self {
        Self {
            settle: Duration::from_millis(settings.settle_ms),
            min_execution: Duration::from_millis(settings.min_execution_ms),
            background_cooldown: Duration::from_millis(settings.background_cooldown_ms),
            submit_delay: Duration::from_millis(settings.submit_delay_ms),
            max_output_chars: settings.max_output_chars,
            short_result_chars: settings.short_result_chars,
            garbled_detection: settings.garbled_detection,
        }
    }
}

impl DetectorConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_chars: self.max_output_chars,
            garbled_detection: self.garbled_detection,
        }
    }
}

/// One in-flight prompt
#[derive(Debug, Clone)]
pub struct ProcessingState {
    pub prompt: String,
    pub started_at: Instant,
    /// Raw output since submission
    pub buffer: String,
    pub submitted: bool,
    pub submitted_at: Option<Instant>,
    pub background_active: bool,
    pub last_background_at: Option<Instant>,
    settle_deadline: Option<Instant>,
    /// Buffer length when a short answer was deferred
    deferred_at_len: Option<usize>,
}

impl ProcessingState {
    pub fn new(prompt: impl Into<String>, now: Instant) -> Self {
        Self {
            prompt: prompt.into(),
            started_at: now,
            buffer: String::new(),
            submitted: false,
            submitted_at: None,
            background_active: false,
            last_background_at: None,
            settle_deadline: None,
            deferred_at_len: None,
        }
    }

    pub fn mark_submitted(&mut self, now: Instant) {
        self.submitted = true;
        self.submitted_at = Some(now);
    }

    /// Pending settle deadline, if armed
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }
}

/// Result of [`CompletionDetector::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorPoll {
    /// Not done; poll again at the given instant, or when new output arrives
    Pending(Option<Instant>),
    /// Extracted answer
    Complete(String),
}

/// Idle-prompt completion detector
#[derive(Debug, Clone, Default)]
pub struct CompletionDetector {
    config: DetectorConfig,
}

impl CompletionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Record one output chunk
    pub fn on_output(&self, state: &mut ProcessingState, chunk: &str, now: Instant) {
        state.buffer.push_str(chunk);

        if patterns::is_background_activity(&extract::clean(chunk)) {
            state.background_active = true;
            state.last_background_at = Some(now);
            if state.settle_deadline.take().is_some() {
                debug!("Background activity, settle cancelled");
            }
            return;
        }

        if !self.idle_visible(state) {
            state.settle_deadline = None;
            return;
        }

        if state.settle_deadline.is_none() && self.floors_clear_at(state) <= now {
            state.settle_deadline = Some(now + self.config.settle);
        }
    }

    /// Check for completion at `now`
    pub fn poll(&self, state: &mut ProcessingState, now: Instant) -> DetectorPoll {
        if let Some(deadline) = state.settle_deadline {
            if now < deadline {
                return DetectorPoll::Pending(Some(deadline));
            }

            state.settle_deadline = None;
            let text = self.finalize(state);
            if state.background_active && text.chars().count() < self.config.short_result_chars {
                debug!(chars = text.len(), "Short answer while background work was seen, deferring");
                state.deferred_at_len = Some(state.buffer.len());
                return DetectorPoll::Pending(None);
            }
            return DetectorPoll::Complete(text);
        }

        // A deferred answer needs fresh output before it is reconsidered
        if state.deferred_at_len == Some(state.buffer.len()) || !self.idle_visible(state) {
            return DetectorPoll::Pending(None);
        }

        let clear_at = self.floors_clear_at(state);
        if clear_at > now {
            return DetectorPoll::Pending(Some(clear_at));
        }

        let deadline = now + self.config.settle;
        state.settle_deadline = Some(deadline);
        DetectorPoll::Pending(Some(deadline))
    }

    /// Extract whatever answer the buffer holds now
    pub fn finalize(&self, state: &ProcessingState) -> String {
        extract_response(&state.buffer, &state.prompt, self.config.extract_options())
    }

    /// Earliest instant an idle match may be honored
    fn floors_clear_at(&self, state: &ProcessingState) -> Instant {
        let min_execution = state.started_at + self.config.min_execution;
        match state.last_background_at {
            Some(seen) => min_execution.max(seen + self.config.background_cooldown),
            None => min_execution,
        }
    }

    fn idle_visible(&self, state: &ProcessingState) -> bool {
        let clean = extract::clean(recent(&state.buffer));
        patterns::is_idle_tail(&patterns::tail(&clean))
    }
}

/// Bytes of raw buffer scanned for the idle tail
const RECENT_WINDOW: usize = 4096;

fn recent(buffer: &str) -> &str {
    let mut start = buffer.len().saturating_sub(RECENT_WINDOW);
    while !buffer.is_char_boundary(start) {
        start += 1;
    }
    &buffer[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: &str = "\n╭────────────╮\n│ >          │\n╰────────────╯\n";
    const ANSWER: &str =
        "⏺ The build failed because the feature flag was missing from Cargo.toml.\n";

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Poll at one-second steps until completion or `limit`
    fn run_until(
        detector: &CompletionDetector,
        state: &mut ProcessingState,
        t0: Instant,
        from: u64,
        limit: u64,
    ) -> Option<u64> {
        (from..=limit).find(|s| matches!(detector.poll(state, t0 + secs(*s)), DetectorPoll::Complete(_)))
    }

    #[test]
    fn test_idle_before_min_execution_waits_for_floor_plus_settle() {
        let detector = CompletionDetector::default();
        let t0 = Instant::now();
        let mut state = ProcessingState::new("why did the build fail?", t0);
        state.mark_submitted(t0);

        detector.on_output(&mut state, ANSWER, t0 + secs(1));
        detector.on_output(&mut state, IDLE, t0 + secs(2));
        assert!(state.settle_deadline().is_none());

        assert_eq!(detector.poll(&mut state, t0 + secs(5)), DetectorPoll::Pending(Some(t0 + secs(10))));
        assert_eq!(run_until(&detector, &mut state, t0, 6, 60), Some(15));
    }

    #[test]
    fn test_background_activity_extends_wait() {
        let detector = CompletionDetector::default();
        let t0 = Instant::now();
        let mut state = ProcessingState::new("audit the repo", t0);

        detector.on_output(&mut state, "⏺ Launching agents\n", t0 + secs(11));
        detector.on_output(&mut state, "  ⎿  Task (scan dependencies)\n", t0 + secs(12));
        assert!(state.background_active);

        detector.on_output(&mut state, ANSWER, t0 + secs(13));
        detector.on_output(&mut state, IDLE, t0 + secs(13));
        assert!(state.settle_deadline().is_none());

        // Cooldown ends at 42, settle runs to 47
        assert_eq!(run_until(&detector, &mut state, t0, 13, 120), Some(47));
    }

    #[test]
    fn test_new_output_cancels_settle() {
        let detector = CompletionDetector::default();
        let t0 = Instant::now();
        let mut state = ProcessingState::new("refactor", t0);

        detector.on_output(&mut state, ANSWER, t0 + secs(11));
        detector.on_output(&mut state, IDLE, t0 + secs(11));
        assert_eq!(state.settle_deadline(), Some(t0 + secs(16)));

        detector.on_output(&mut state, "⏺ Running cargo test…\n", t0 + secs(14));
        assert!(state.settle_deadline().is_none());
        assert_eq!(detector.poll(&mut state, t0 + secs(16)), DetectorPoll::Pending(None));

        detector.on_output(&mut state, ANSWER, t0 + secs(20));
        detector.on_output(&mut state, IDLE, t0 + secs(20));
        assert_eq!(run_until(&detector, &mut state, t0, 20, 60), Some(25));
    }

    #[test]
    fn test_short_answer_with_background_is_deferred() {
        let detector = CompletionDetector::default();
        let t0 = Instant::now();
        let mut state = ProcessingState::new("audit", t0);

        detector.on_output(&mut state, "2 background tasks\n", t0 + secs(1));
        detector.on_output(&mut state, "⏺ Started.\n", t0 + secs(2));
        detector.on_output(&mut state, IDLE, t0 + secs(2));

        // Cooldown to 31, settle to 36, then deferred
        assert_eq!(run_until(&detector, &mut state, t0, 2, 100), None);
        assert!(state.deferred_at_len.is_some());

        detector.on_output(&mut state, ANSWER, t0 + secs(101));
        detector.on_output(&mut state, IDLE, t0 + secs(101));
        match detector.poll(&mut state, t0 + secs(106)) {
            DetectorPoll::Complete(text) => assert!(text.starts_with("The build failed")),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = DetectorConfig::from(&DetectorSettings {
            settle_ms: 1000,
            ..Default::default()
        });
        assert_eq!(config.settle, secs(1));
        assert_eq!(config.min_execution, secs(10));
        assert_eq!(config.background_cooldown, secs(30));
        assert_eq!(config.max_output_chars, 8000);
    }
}
