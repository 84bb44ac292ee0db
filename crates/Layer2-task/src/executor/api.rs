//! API executor - sends the prompt to a Messages-style HTTP endpoint

use super::output::{classify_text, NormalizedResult, ProcessError, ProcessErrorKind, TokenUsage};
use super::r#trait::{Executor, OutputSink};
use super::process::to_worker_result;
use crate::task::{ExecutionMode, WorkerResult, WorkerTask};
use async_trait::async_trait;
use conductor_foundation::{ApiSettings, Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// API executor configuration
#[derive(Debug, Clone)]
pub struct ApiExecutorConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the key
    pub api_key_env: String,
}

impl Default for ApiExecutorConfig {
    fn default() -> Self {
        Self::from(&ApiSettings::default())
    }
}

impl From<&ApiSettings> for ApiExecutorConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            api_key_env: settings.api_key_env.clone(),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

// ============================================================================
// Executor
// ============================================================================

/// Executor for [`ExecutionMode::Api`]
pub struct ApiExecutor {
    client: Client,
    config: ApiExecutorConfig,
}

impl ApiExecutor {
    pub fn new(config: ApiExecutorConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn build_request(&self, task: &WorkerTask) -> MessagesRequest {
        MessagesRequest {
            model: task
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            max_tokens: self.config.max_tokens,
            system: task.options.system_prompt.clone(),
            messages: vec![RequestMessage {
                role: "user",
                content: task.prompt.clone(),
            }],
        }
    }

    /// Send one request and normalize the answer
    pub async fn send(&self, task: &WorkerTask) -> NormalizedResult {
        let started = Instant::now();

        let Some(api_key) = self.api_key() else {
            return NormalizedResult::failure(
                ProcessErrorKind::PermissionDenied,
                format!("{} is not set", self.config.api_key_env),
            );
        };

        let request = self.build_request(task);
        debug!(worker_id = %task.id, model = %request.model, "Sending API request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(task.timeout())
            .json(&request)
            .send()
            .await;

        let mut result = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => parse_response(status, &body),
                    Err(e) => NormalizedResult::failure(ProcessErrorKind::ApiError, e.to_string()),
                }
            }
            Err(e) if e.is_timeout() => {
                NormalizedResult::failure(ProcessErrorKind::Timeout, format!("Request timed out: {}", e))
            }
            Err(e) => {
                warn!(worker_id = %task.id, "API request failed: {}", e);
                NormalizedResult::failure(ProcessErrorKind::ApiError, e.to_string())
            }
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

/// Normalize an HTTP response body
fn parse_response(status: u16, body: &str) -> NormalizedResult {
    if !(200..300).contains(&status) {
        let kind = match status {
            401 | 403 => ProcessErrorKind::PermissionDenied,
            429 | 500..=599 => ProcessErrorKind::ApiError,
            _ => classify_text(body),
        };
        let mut message = format!("HTTP {}", status);
        if let Some(detail) = error_detail(body) {
            message = format!("{}: {}", message, detail);
        }
        return NormalizedResult {
            error: Some(ProcessError::new(kind, message)),
            ..Default::default()
        };
    }

    let parsed: MessagesResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return NormalizedResult::failure(ProcessErrorKind::ParseError, format!("Invalid response: {}", e));
        }
    };

    let text = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    NormalizedResult {
        success: true,
        text,
        session_id: parsed.id,
        model: parsed.model,
        usage: TokenUsage {
            input: parsed.usage.input_tokens,
            output: parsed.usage.output_tokens,
            cache_create: parsed.usage.cache_creation_input_tokens,
            cache_read: parsed.usage.cache_read_input_tokens,
        },
        turns: 1,
        exit_code: Some(0),
        ..Default::default()
    }
}

fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[async_trait]
impl Executor for ApiExecutor {
    async fn execute(&self, task: &WorkerTask, sink: Option<OutputSink>) -> Result<WorkerResult> {
        if task.mode != ExecutionMode::Api {
            return Err(Error::Task(format!(
                "ApiExecutor cannot execute {} tasks",
                task.mode.name()
            )));
        }

        let result = self.send(task).await;
        if let (Some(sink), true) = (&sink, result.success) {
            sink(&result.text);
        }
        Ok(to_worker_result(&task.id, &result))
    }

    async fn cancel(&self, _worker_id: &str) -> Result<bool> {
        // Requests are bounded by their timeout
        Ok(false)
    }

    fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    fn name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::BackendOptions;

    #[test]
    fn test_build_request() {
        let executor = ApiExecutor::new(ApiExecutorConfig::default());
        let task = WorkerTask::new("summarize README")
            .with_mode(ExecutionMode::Api)
            .with_options(BackendOptions {
                system_prompt: Some("Be brief.".into()),
                ..Default::default()
            });

        let json = serde_json::to_value(executor.build_request(&task)).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["system"], "Be brief.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "summarize README");
    }

    #[test]
    fn test_parse_success_response() {
        let body = r#"{
            "id": "msg_01",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "First."},
                {"type": "tool_use", "id": "t", "name": "x", "input": {}},
                {"type": "text", "text": "Second."}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7, "cache_read_input_tokens": 3}
        }"#;

        let result = parse_response(200, body);
        assert!(result.success);
        assert_eq!(result.text, "First.\nSecond.");
        assert_eq!(result.session_id.as_deref(), Some("msg_01"));
        assert_eq!(result.usage.total(), 22);
    }

    #[test]
    fn test_parse_error_responses() {
        let result = parse_response(429, r#"{"error":{"type":"rate_limit_error","message":"Slow down"}}"#);
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ProcessErrorKind::ApiError));
        assert_eq!(result.error.map(|e| e.message).as_deref(), Some("HTTP 429: Slow down"));

        let result = parse_response(401, "");
        assert_eq!(result.error_kind(), Some(ProcessErrorKind::PermissionDenied));

        let result = parse_response(200, "not json");
        assert_eq!(result.error_kind(), Some(ProcessErrorKind::ParseError));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let executor = ApiExecutor::new(ApiExecutorConfig {
            api_key_env: "CONDUCTOR_TEST_MISSING_KEY".into(),
            ..Default::default()
        });
        assert!(!executor.is_available());

        let task = WorkerTask::new("hi").with_mode(ExecutionMode::Api).with_id("w-1");
        let result = executor.execute(&task, None).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("CONDUCTOR_TEST_MISSING_KEY"));
    }
}
