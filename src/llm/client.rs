//! Chat completion provider: trait seam plus the OpenAI-compatible client.
//!
//! The provider is stateless per request. The HTTP client retries transient
//! failures up to twice with exponential backoff; everything past that
//! surfaces as `RetriesExhausted` and becomes user-facing text at the
//! orchestrator boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use uuid::Uuid;

use super::errors::LlmError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatOutcome, ToolCall,
    ToolDefinition,
};
use crate::config::LlmConfig;

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout per completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Maximum retry attempts for transient provider errors.
const MAX_RETRIES: u32 = 2;

/// Base delay between retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── Provider trait ─────────────────────────────────────────────────────────

/// The single contract the agents consume: an ordered message sequence plus
/// an optional tool schema list in, a final text or tool-call proposal out.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatOutcome, LlmError>;
}

// ─── OpenAI-compatible client ───────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: HttpClient,
    config: LlmConfig,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Build a client from config; the API key is read from the environment
    /// variable named in `config.api_key_env`.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            std::env::var(&config.api_key_env).ok().filter(|k| !k.trim().is_empty())
        };

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    async fn try_request(
        &self,
        messages: &[ChatMessage],
        tools: &Option<Vec<ToolDefinition>>,
    ) -> Result<ChatOutcome, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: tools.clone(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    endpoint: url.clone(),
                }
            } else {
                LlmError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                reason: "response contained no choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCall {
                    id: if tc.id.is_empty() {
                        format!("call_{}", Uuid::new_v4())
                    } else {
                        tc.id
                    },
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(ChatOutcome {
            text: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatOutcome, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying provider");
                tokio::time::sleep(delay).await;
            }

            match self.try_request(&messages, &tools).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    tracing::warn!(attempt, error = %e, "transient provider error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: MAX_RETRIES + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

// ─── Scripted provider (test double) ────────────────────────────────────────


// ─── Tests ──────────────────────────────────────────────────────────────────
