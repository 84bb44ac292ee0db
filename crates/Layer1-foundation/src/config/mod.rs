//! Config - file-backed settings
//!
//! - `conductor.rs` - `ConductorConfig` and its per-component sections

mod conductor;

pub use conductor::{
    ApiSettings, ApprovalTimeoutPolicy, ConductorConfig, DetectorSettings, PoolSettings,
    ProcessSettings, SchedulerSettings, CONDUCTOR_CONFIG_FILE,
};
