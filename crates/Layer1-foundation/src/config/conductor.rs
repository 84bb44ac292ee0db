//! Conductor Config - merged global + project settings

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Config file name inside a store
pub const CONDUCTOR_CONFIG_FILE: &str = "config.json";

// ============================================================================
// ConductorConfig
// ============================================================================

/// Top-level settings. Every field has a default, so partial files are fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConductorConfig {
    pub scheduler: SchedulerSettings,
    pub pool: PoolSettings,
    pub process: ProcessSettings,
    pub detector: DetectorSettings,
    pub api: ApiSettings,
}

impl ConductorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Defaults, then the global file, then the project file
    pub fn load() -> Result<Self> {
        let mut stores = Vec::new();
        if let Ok(global) = JsonStore::global() {
            stores.push(global);
        }
        if let Ok(project) = JsonStore::current_project() {
            stores.push(project);
        }
        Self::load_from(&stores)
    }

    /// Merge the config file of each store in order (later wins, key by key)
    pub fn load_from(stores: &[JsonStore]) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        for store in stores {
            if let Some(layer) = store.load_optional::<Value>(CONDUCTOR_CONFIG_FILE)? {
                debug!(path = %store.file_path(CONDUCTOR_CONFIG_FILE).display(), "Merging config");
                merge_json(&mut merged, layer);
            }
        }

        serde_json::from_value(merged).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(CONDUCTOR_CONFIG_FILE, self)
    }

    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(CONDUCTOR_CONFIG_FILE, self)
    }
}

/// Deep merge of JSON objects; non-object values are replaced
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// What an unanswered approval request resolves to.
/// Only `deny` exists: approval never happens by silent timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalTimeoutPolicy {
    #[default]
    Deny,
}

/// Command scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Commands waiting while a task is running
    pub queue_capacity: usize,
    pub approval_timeout_secs: u64,
    pub approval_timeout_policy: ApprovalTimeoutPolicy,
    /// Skip approval for every command
    pub auto_approve: bool,
    /// Extra execute/review rounds when review asks for a retry
    pub max_retry_rounds: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            approval_timeout_secs: 300,
            approval_timeout_policy: ApprovalTimeoutPolicy::Deny,
            auto_approve: false,
            max_retry_rounds: 1,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    pub max_concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            queue_capacity: 20,
        }
    }
}

/// Spawned process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    pub default_timeout_secs: u64,
    /// Delay between SIGTERM and SIGKILL
    pub kill_grace_secs: u64,
    /// Extra env patterns stripped from child processes (`AWS_*`, `*_TOKEN`)
    pub blocked_env: Vec<String>,
    /// Env patterns always passed through
    pub allowed_env: Vec<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600,
            kill_grace_secs: 10,
            blocked_env: Vec::new(),
            allowed_env: Vec::new(),
        }
    }
}

/// Interactive completion detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorSettings {
    pub settle_ms: u64,
    pub min_execution_ms: u64,
    pub background_cooldown_ms: u64,
    pub submit_delay_ms: u64,
    pub max_output_chars: usize,
    pub short_result_chars: usize,
    pub garbled_detection: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            settle_ms: 5_000,
            min_execution_ms: 10_000,
            background_cooldown_ms: 30_000,
            submit_delay_ms: 150,
            max_output_chars: 8_000,
            short_result_chars: 50,
            garbled_detection: true,
        }
    }
}

/// HTTP API backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}
