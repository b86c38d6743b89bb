//! SQL-Query agent: generate → execute → format, with mandatory caching.
//!
//! The LLM drives the tool loop, but the post-processing contract is
//! enforced here regardless of what the model returned: a successful
//! `execute_sql` in the trace always produces exactly one stored Query
//! Record, and the reply text prefers the formatter's output over the
//! model's free-form prose.

use std::sync::Arc;

use crate::config::BotConfig;
use crate::errors::AgentError;
use crate::llm::ChatProvider;
use crate::memory::types::{MessageRole, QueryResult, StoredMessage};
use crate::memory::MemoryStore;
use crate::tools::{self, formatting, Toolbox};

use super::prompts::sql_query_system_prompt;
use super::runner::{run_tool_loop, LoopOutcome};
use super::AgentReply;

/// History turns quoted into the agent's user message.
const HISTORY_WINDOW: usize = 3;

pub struct SqlQueryAgent {
    provider: Arc<dyn ChatProvider>,
    toolbox: Arc<Toolbox>,
    memory: Arc<MemoryStore>,
    config: Arc<BotConfig>,
}

impl SqlQueryAgent {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        toolbox: Arc<Toolbox>,
        memory: Arc<MemoryStore>,
        config: Arc<BotConfig>,
    ) -> Self {
        Self {
            provider,
            toolbox,
            memory,
            config,
        }
    }

    /// Run the full query workflow for one question.
    pub async fn run(
        &self,
        thread_id: &str,
        question: &str,
        history: &[StoredMessage],
    ) -> Result<AgentReply, AgentError> {
        let user_message = build_user_message(question, history);
        let system_prompt = sql_query_system_prompt(&self.config.table_name);

        let outcome = run_tool_loop(
            self.provider.as_ref(),
            self.toolbox.as_ref(),
            thread_id,
            &system_prompt,
            &user_message,
            &[tools::GENERATE_SQL, tools::EXECUTE_SQL, tools::FORMAT_RESULT],
            self.config.agent_step_limit,
        )
        .await?;

        Ok(self.post_process(thread_id, question, outcome))
    }

    /// Apply the authoritative post-processing contract to a finished loop.
    fn post_process(&self, thread_id: &str, question: &str, outcome: LoopOutcome) -> AgentReply {
        let executed = last_execution(&outcome);

        match executed {
            Some((sql, result)) if result.success => {
                // Mandatory store step, independent of the model's final text.
                self.memory.store_sql_query(
                    thread_id,
                    sql.clone(),
                    question,
                    Some(result.clone()),
                );
                tracing::info!(
                    thread_id,
                    sql = %sql,
                    rows = result.row_count,
                    "stored query record"
                );

                let text = outcome
                    .last_invocation(tools::FORMAT_RESULT)
                    .and_then(|i| i.result.as_str().map(str::to_string))
                    .unwrap_or_else(|| formatting::format_result(&result, question));
                AgentReply::text_only(text)
            }
            Some((_, result)) => {
                // Execution happened but failed: no record, surface the error.
                AgentReply::text_only(formatting::format_result(&result, question))
            }
            None => {
                let text = outcome.final_text.unwrap_or_else(|| {
                    "I couldn't process your query. Please try rephrasing it.".to_string()
                });
                AgentReply::text_only(text)
            }
        }
    }
}

/// The most recent `execute_sql` invocation, decoded.
fn last_execution(outcome: &LoopOutcome) -> Option<(String, QueryResult)> {
    let invocation = outcome.last_invocation(tools::EXECUTE_SQL)?;
    let sql = invocation
        .arguments
        .get("sql_query")
        .and_then(|v| v.as_str())?
        .to_string();
    let result: QueryResult = serde_json::from_value(invocation.result.clone()).ok()?;
    Some((sql, result))
}

/// Fold the question and the recent history window into one user turn.
fn build_user_message(question: &str, history: &[StoredMessage]) -> String {
    let context: Vec<String> = history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .rev()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::Summary => "Context",
            };
            format!("{role}: {}", m.content)
        })
        .collect();

    if context.is_empty() {
        question.to_string()
    } else {
        format!(
            "Question: {question}\n\nPrevious conversation:\n{}\n\n\
             Please answer the question using the available tools.",
            context.join("\n")
        )
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
