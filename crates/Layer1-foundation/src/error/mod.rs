//! Error types for Conductor
//!
//! All fallible APIs in the workspace return [`Result`] with this error.
//! Worker-level failures are carried as data inside results instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Conductor error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Security / approval
    // ========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Approval rejected: {0}")]
    ApprovalRejected(String),

    // ========================================================================
    // Scheduling
    // ========================================================================
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Task error: {0}")]
    Task(String),

    // ========================================================================
    // Process execution
    // ========================================================================
    #[error("Process error: {0}")]
    Process(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::QueueFull(_) | Error::Http(_)
        )
    }

    /// Whether the message is meant for the end user
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::ApprovalRejected(_)
                | Error::QueueFull(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Cancelled
        )
    }

    /// Invalid transition helper
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

// ============================================================================
// From impls
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
