//! Off-Topic agent: polite redirect for non-database questions.
//!
//! No tools. One LLM call shapes the acknowledgement; if the provider is
//! unavailable the fixed fallback response goes out instead, so this agent
//! never fails a request.

use std::sync::Arc;

use crate::llm::types::ChatMessage;
use crate::llm::ChatProvider;

use super::prompts::{OFF_TOPIC_FALLBACK, OFF_TOPIC_SYSTEM_PROMPT};
use super::AgentReply;

pub struct OffTopicAgent {
    provider: Arc<dyn ChatProvider>,
}

impl OffTopicAgent {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Acknowledge the message and steer back to supported queries.
    pub async fn run(&self, thread_id: &str, user_message: &str) -> AgentReply {
        let messages = vec![
            ChatMessage::system(OFF_TOPIC_SYSTEM_PROMPT),
            ChatMessage::user(user_message),
        ];

        match self.provider.complete(messages, None).await {
            Ok(outcome) => match outcome.text.filter(|t| !t.trim().is_empty()) {
                Some(text) => AgentReply::text_only(text),
                None => AgentReply::text_only(OFF_TOPIC_FALLBACK),
            },
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "off-topic response fell back");
                AgentReply::text_only(OFF_TOPIC_FALLBACK)
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
