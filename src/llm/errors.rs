//! Provider error types.

use thiserror::Error;

/// Errors from the chat completion provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Could not reach the endpoint at all.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The request timed out.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The endpoint answered with a non-success status.
    #[error("provider returned HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    /// The response body could not be parsed.
    #[error("invalid provider response: {reason}")]
    InvalidResponse { reason: String },

    /// Retries exhausted without a usable response.
    #[error("provider unavailable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl LlmError {
    /// Transient failures worth a bounded retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::ConnectionFailed { .. } | LlmError::Timeout { .. } => true,
            LlmError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
