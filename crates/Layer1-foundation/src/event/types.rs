//! Event Types - shared event envelope
//!
//! Every layer publishes the same [`ConductorEvent`] shape; the payload lives
//! in `data` as a JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Event ID
// ============================================================================

/// Unique event ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event Category
// ============================================================================

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Startup, shutdown, config changes
    System,
    /// Command scheduler lifecycle
    Scheduler,
    /// Worker pool lifecycle
    Worker,
    /// Spawned process / terminal session
    Process,
    /// Errors not tied to a narrower category
    Error,
    /// User-defined
    Custom,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Scheduler => "scheduler",
            Self::Worker => "worker",
            Self::Process => "process",
            Self::Error => "error",
            Self::Custom => "custom",
        }
    }
}

// ============================================================================
// Event Severity
// ============================================================================

/// Event severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

// ============================================================================
// ConductorEvent
// ============================================================================

/// Event envelope published on the [`EventBus`](super::EventBus)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorEvent {
    /// Event ID
    pub id: EventId,

    /// Event type, e.g. "scheduler.progress", "worker.done"
    pub event_type: String,

    /// Category
    pub category: EventCategory,

    /// Severity
    pub severity: EventSeverity,

    /// When the event was created
    pub timestamp: DateTime<Utc>,

    /// Emitting component
    pub source: String,

    /// Owning task ID, if any
    pub task_id: Option<String>,

    /// Payload
    pub data: Value,

    /// Extra metadata
    pub metadata: HashMap<String, Value>,
}

impl ConductorEvent {
    pub fn new(event_type: impl Into<String>, category: EventCategory) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            category,
            severity: EventSeverity::Info,
            timestamp: Utc::now(),
            source: String::new(),
            task_id: None,
            data: Value::Null,
            metadata: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a string field from the payload
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Whether the event type equals `name` or lives under it ("worker" matches "worker.done")
    pub fn is(&self, name: &str) -> bool {
        self.event_type == name
            || (self.event_type.starts_with(name)
                && self.event_type[name.len()..].starts_with('.'))
    }
}

// ============================================================================
// Predefined events
// ============================================================================

/// System events
pub mod system {
    use super::*;

    pub fn started(version: &str) -> ConductorEvent {
        ConductorEvent::new("system.started", EventCategory::System)
            .with_source("conductor")
            .with_data(serde_json::json!({ "version": version }))
    }

    pub fn config_loaded(sources: &[String]) -> ConductorEvent {
        ConductorEvent::new("system.config_loaded", EventCategory::System)
            .with_source("config")
            .with_data(serde_json::json!({ "sources": sources }))
    }
}

/// Generic error events
pub mod error {
    use super::*;

    pub fn occurred(source: &str, message: &str) -> ConductorEvent {
        ConductorEvent::new("error.occurred", EventCategory::Error)
            .with_severity(EventSeverity::Error)
            .with_source(source)
            .with_data(serde_json::json!({ "error": message }))
    }
}
