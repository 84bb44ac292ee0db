//! # conductor-foundation
//!
//! Foundation layer for Conductor:
//! - Error: the shared `Error`/`Result` types
//! - Event: publish/subscribe bus for scheduler and worker events
//! - Config: `ConductorConfig` (global + project JSON files)
//! - Permission: risk analysis of incoming commands
//! - Telemetry: `tracing` subscriber setup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Layer3-agent   Command Scheduler (FSM, approval)        │
//! │                     │                                   │
//! │  Layer2-task    Worker Pool ─► Executors ─► Processes    │
//! │                     │                                   │
//! │  Layer1-foundation  Error · EventBus · Config · Security │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod permission;
pub mod storage;
pub mod telemetry;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    ApiSettings, ApprovalTimeoutPolicy, ConductorConfig, DetectorSettings, PoolSettings,
    ProcessSettings, SchedulerSettings, CONDUCTOR_CONFIG_FILE,
};

// ============================================================================
// Permission
// ============================================================================
pub use permission::{command_analyzer, CommandAnalysis, CommandAnalyzer, CommandRisk, RiskPattern};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;

// ============================================================================
// Event
// ============================================================================
pub use event::{
    global_event_bus, init_global_event_bus, ConductorEvent, EventBus, EventBusConfig,
    EventCategory, EventFilter, EventId, EventListener, EventSeverity, ListenerId,
};

// ============================================================================
// Telemetry
// ============================================================================
pub use telemetry::init_tracing;
