//! Review report - the verdict over a batch of worker results

use crate::capability::Analysis;
use conductor_task::{WorkerResult, WorkerStatus};
use serde::{Deserialize, Serialize};

/// Overall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Partial,
    Failed,
}

/// Build verdict found in the results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pass,
    Fail,
    #[default]
    Unknown,
}

/// Synthesized verdict over worker results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub task_id: String,
    pub status: ReportStatus,
    /// Human summary
    pub summary: String,
    /// Raw details (usually concatenated worker output)
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Excerpt of test output, if any
    #[serde(default)]
    pub test_results: Option<String>,
    #[serde(default)]
    pub build_status: BuildStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Ask for one more execute/review round
    #[serde(default)]
    pub should_retry: bool,
    #[serde(default)]
    pub retry_reason: Option<String>,
}

impl ReviewReport {
    pub fn new(task_id: impl Into<String>, status: ReportStatus, summary: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            summary: summary.into(),
            details: String::new(),
            changed_files: Vec::new(),
            test_results: None,
            build_status: BuildStatus::Unknown,
            warnings: Vec::new(),
            next_steps: Vec::new(),
            should_retry: false,
            retry_reason: None,
        }
    }

    /// Report for a command answered straight from the analysis
    pub fn answer(task_id: impl Into<String>, analysis: &Analysis) -> Self {
        let mut report = Self::new(task_id, ReportStatus::Success, analysis.summary.clone());
        report.details = analysis.answer.clone().unwrap_or_default();
        report
    }

    /// Status and summary derived from result statuses alone
    pub fn from_results(task_id: impl Into<String>, results: &[WorkerResult]) -> Self {
        let total = results.len();
        let completed = results.iter().filter(|r| r.is_success()).count();

        let status = match completed {
            0 => ReportStatus::Failed,
            n if n == total => ReportStatus::Success,
            _ => ReportStatus::Partial,
        };

        let mut report = Self::new(
            task_id,
            status,
            format!("{}/{} workers completed", completed, total),
        );

        report.details = results
            .iter()
            .map(|r| format!("[{} {}] {}", r.status.symbol(), r.worker_id, r.output.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        report.warnings = results
            .iter()
            .filter(|r| r.status != WorkerStatus::Completed)
            .map(|r| {
                format!(
                    "{} {}: {}",
                    r.worker_id,
                    r.status,
                    r.error.as_deref().unwrap_or("no error message")
                )
            })
            .collect();

        report
    }

    pub fn with_retry(mut self, reason: impl Into<String>) -> Self {
        self.should_retry = true;
        self.retry_reason = Some(reason.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}
