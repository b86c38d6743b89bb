//! SQL-Retrieval agent: shows previously executed SQL without regenerating.
//!
//! A pure cache-reuse path: the description fragment is extracted from the
//! request, matched against stored Query Records, and the hit is rendered in
//! a fenced code block. No LLM call, no SQL generation or execution.

use std::sync::Arc;

use crate::errors::AgentError;
use crate::tools::Toolbox;

use super::prompts::RETRIEVAL_NOT_FOUND;
use super::AgentReply;

pub struct SqlRetrievalAgent {
    toolbox: Arc<Toolbox>,
}

impl SqlRetrievalAgent {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }

    /// Look up and render the SQL behind an earlier answer.
    pub async fn run(&self, thread_id: &str, user_message: &str) -> Result<AgentReply, AgentError> {
        let description = extract_description(user_message);
        tracing::debug!(thread_id, description = ?description, "sql retrieval lookup");

        let payload = self
            .toolbox
            .get_sql_history(thread_id, description.as_deref());

        if payload["sql_found"] != serde_json::Value::Bool(true) {
            return Ok(AgentReply::text_only(RETRIEVAL_NOT_FOUND));
        }

        let sql = payload["sql_statement"].as_str().unwrap_or_default();
        let question = payload["question"].as_str().unwrap_or_default();

        let text = if question.is_empty() {
            format!("Here is the SQL query:\n```sql\n{sql}\n```")
        } else {
            format!("Here is the SQL query I used for \"{question}\":\n```sql\n{sql}\n```")
        };
        Ok(AgentReply::text_only(text))
    }
}

/// Pull the description fragment out of a retrieval request: the tokens
/// after "used for" / "used to" / "sql for". Trailing punctuation is
/// dropped. `None` means "most recent query".
fn extract_description(message: &str) -> Option<String> {
    // Matching happens on the lowercased text; the fragment is taken from it
    // too, since stored-question matching is case-insensitive anyway.
    let lower = message.to_lowercase();

    for pattern in ["used for ", "used to ", "sql for ", "query for "] {
        if let Some(pos) = lower.find(pattern) {
            let fragment = lower[pos + pattern.len()..]
                .trim()
                .trim_end_matches(['?', '.', '!']);
            if !fragment.is_empty() {
                return Some(fragment.to_string());
            }
        }
    }
    None
}

// ─── Tests ──────────────────────────────────────────────────────────────────
