//! Child environment sanitizing
//!
//! Backends run with the parent's environment minus credentials:
//! - Blocked patterns (e.g., `AWS_*`, `*_TOKEN`) are removed before spawn
//! - Allowed patterns take precedence over blocked patterns
//! - Secret values can be masked in captured output

use conductor_foundation::ProcessSettings;
use std::collections::HashMap;

/// Environment filter applied to every spawned process and terminal session
#[derive(Debug, Clone)]
pub struct EnvSecurityConfig {
    /// Patterns to block (e.g., "AWS_*", "*_TOKEN")
    pub blocked_patterns: Vec<String>,

    /// Patterns to allow (takes precedence over blocked)
    pub allowed_patterns: Vec<String>,

    /// Whether to mask blocked values that show up in output
    pub mask_in_output: bool,

    pub mask_char: String,
}

impl Default for EnvSecurityConfig {
    fn default() -> Self {
        let blocked = [
            // Cloud credentials
            "AWS_*",
            "AZURE_*",
            "GCP_*",
            "GOOGLE_APPLICATION_CREDENTIALS",
            // Generic secrets
            "*_SECRET",
            "*_SECRET_*",
            "*_TOKEN",
            "*_TOKEN_*",
            "*_KEY",
            "*_API_KEY",
            "*_APIKEY",
            "*_PASSWORD",
            "*_CREDENTIALS",
            // Model providers
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "CLAUDE_API_KEY",
            // Forges / registries
            "GITHUB_TOKEN",
            "GITLAB_TOKEN",
            "NPM_TOKEN",
            // Database
            "DATABASE_URL",
            "MONGODB_URI",
            "REDIS_URL",
            // SSH/GPG agents
            "SSH_*",
            "GPG_*",
        ];
        let allowed = [
            "PATH", "HOME", "USER", "SHELL", "TERM", "LANG", "LC_*", "TZ", "TMPDIR", "NODE_ENV",
            "RUST_LOG", "RUST_BACKTRACE", "CARGO_*", "RUSTUP_*", "EDITOR", "VISUAL", "COLORTERM",
        ];

        Self {
            blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
            allowed_patterns: allowed.iter().map(|s| s.to_string()).collect(),
            mask_in_output: true,
            mask_char: "***".to_string(),
        }
    }
}

impl From<&ProcessSettings> for EnvSecurityConfig {
    fn from(settings: &ProcessSettings) -> Self {
        let mut config = Self::default();
        config
            .blocked_patterns
            .extend(settings.blocked_env.iter().cloned());
        config
            .allowed_patterns
            .extend(settings.allowed_env.iter().cloned());
        config
    }
}

impl EnvSecurityConfig {
    /// Whether a variable must not reach the child
    pub fn is_blocked(&self, name: &str) -> bool {
        if self
            .allowed_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, name))
        {
            return false;
        }

        self.blocked_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, name))
    }

    pub fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| !self.is_blocked(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Sanitized copy of the current process environment
    pub fn sanitized_env(&self) -> HashMap<String, String> {
        let env: HashMap<String, String> = std::env::vars().collect();
        self.filter_env(&env)
    }

    /// Replace values of blocked variables found in `output`
    pub fn mask_output(&self, output: &str, env: &HashMap<String, String>) -> String {
        if !self.mask_in_output {
            return output.to_string();
        }

        let mut result = output.to_string();
        for (name, value) in env {
            // Short values would mask unrelated text
            if value.len() > 3 && self.is_blocked(name) {
                result = result.replace(value, &self.mask_char);
            }
        }
        result
    }

    /// Mask against the current process environment
    pub fn mask_process_secrets(&self, output: &str) -> String {
        let env: HashMap<String, String> = std::env::vars().collect();
        self.mask_output(output, &env)
    }
}

/// Glob-like match with a leading and/or trailing `*`
fn pattern_matches(pattern: &str, s: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(_), Some(_)) if pattern.len() >= 2 => s.contains(&pattern[1..pattern.len() - 1]),
        (Some(suffix), _) => s.ends_with(suffix),
        (None, Some(prefix)) => s.starts_with(prefix),
        (None, None) => s == pattern,
    }
}
