//! Capabilities the scheduler delegates to
//!
//! The scheduler decides *when* things happen; these traits decide *what*:
//! - [`SecurityPolicy`] - pre-check of the raw command
//! - [`Analyzer`] - classify the command
//! - [`Planner`] - turn an analysis into worker tasks
//! - [`Reviewer`] - judge the worker results
//! - [`Reporter`] - deliver the final report

use crate::report::ReviewReport;
use crate::security::PatternSecurityPolicy;
use crate::task::Task;
use async_trait::async_trait;
use conductor_foundation::Result;
use conductor_task::{ExecutionStrategy, WorkerResult, WorkerTask};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// Data passed between capabilities
// ============================================================================

/// What the command is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Information only, nothing to execute
    Question,
    Code,
    Fix,
    Test,
    Build,
    Deploy,
    Review,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Result of the analysis step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub intent: Intent,
    pub complexity: Complexity,
    pub summary: String,
    /// Direct answer for questions that need no workers
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Analysis {
    pub fn new(intent: Intent, complexity: Complexity, summary: impl Into<String>) -> Self {
        Self {
            intent,
            complexity,
            summary: summary.into(),
            answer: None,
            requires_approval: false,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    /// Answered without planning or execution
    pub fn is_direct_answer(&self) -> bool {
        self.intent == Intent::Question && self.complexity == Complexity::Simple
    }
}

/// Result of the planning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub strategy: ExecutionStrategy,
    pub workers: Vec<WorkerTask>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub summary: String,
}

impl Plan {
    pub fn new(strategy: ExecutionStrategy, workers: Vec<WorkerTask>) -> Self {
        Self {
            strategy,
            workers,
            requires_approval: false,
            summary: String::new(),
        }
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// What every capability knows about the command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContext {
    pub task_id: String,
    pub command: String,
    pub project_path: Option<PathBuf>,
}

// ============================================================================
// Capability traits
// ============================================================================

/// Pre-check run on every submitted command
pub trait SecurityPolicy: Send + Sync {
    /// `Err` rejects the command outright
    fn validate_command(&self, command: &str) -> Result<()>;

    /// Force approval regardless of what analysis and planning say
    fn requires_approval(&self, command: &str) -> bool;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, command: &str, context: &CommandContext) -> Result<Analysis>;
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, analysis: &Analysis, context: &CommandContext) -> Result<Plan>;
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, results: &[WorkerResult], task: &Task) -> Result<ReviewReport>;
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &ReviewReport) -> Result<()>;
}

// ============================================================================
// Defaults
// ============================================================================

/// Reviewer that only looks at result statuses
#[derive(Debug, Default)]
pub struct SummaryReviewer;

#[async_trait]
impl Reviewer for SummaryReviewer {
    async fn review(&self, results: &[WorkerResult], task: &Task) -> Result<ReviewReport> {
        Ok(ReviewReport::from_results(&task.id, results))
    }
}

/// Reporter that writes the summary to the log
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, report: &ReviewReport) -> Result<()> {
        info!(
            task_id = %report.task_id,
            status = ?report.status,
            "Report: {}", report.summary
        );
        Ok(())
    }
}

/// The capability set a scheduler runs with
#[derive(Clone)]
pub struct Capabilities {
    pub security: Arc<dyn SecurityPolicy>,
    pub analyzer: Arc<dyn Analyzer>,
    pub planner: Arc<dyn Planner>,
    pub reviewer: Arc<dyn Reviewer>,
    pub reporter: Arc<dyn Reporter>,
}

impl Capabilities {
    /// Analyzer and planner plus the default policy, reviewer and reporter
    pub fn new(analyzer: Arc<dyn Analyzer>, planner: Arc<dyn Planner>) -> Self {
        Self {
            security: Arc::new(PatternSecurityPolicy::default()),
            analyzer,
            planner,
            reviewer: Arc::new(SummaryReviewer),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityPolicy>) -> Self {
        self.security = security;
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }
}
