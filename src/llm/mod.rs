//! LLM provider boundary: request/response types, error taxonomy, and the
//! OpenAI-compatible HTTP client behind the [`client::ChatProvider`] trait.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{ChatProvider, OpenAiClient};
pub use errors::LlmError;
pub use types::{ChatMessage, ChatOutcome, Role, ToolCall, ToolDefinition};
