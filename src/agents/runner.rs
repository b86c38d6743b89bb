//! Bounded tool loop driving an LLM through observe/act cycles.
//!
//! The loop is a small state machine: the model either proposes tool calls
//! (executed through the toolbox, results appended as observations) or
//! produces final text. Termination: final text, the step limit, or a
//! provider error. Calls outside the agent's allowed tool subset are not
//! executed; the model observes an error instead, which keeps each agent's
//! capability boundary enforceable rather than advisory.

use serde_json::Value;

use crate::errors::AgentError;
use crate::llm::types::{ChatMessage, ChatOutcome};
use crate::llm::ChatProvider;
use crate::tools::{definitions, Toolbox};

// ─── Trace ──────────────────────────────────────────────────────────────────

/// One executed tool call and its observation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
}

/// Everything a loop run produced, for post-processing by agent wrappers.
#[derive(Debug, Default)]
pub struct LoopOutcome {
    /// The model's final textual answer, if it produced one.
    pub final_text: Option<String>,
    /// Every tool call executed, in order.
    pub invocations: Vec<ToolInvocation>,
}

impl LoopOutcome {
    /// The most recent invocation of a given tool.
    pub fn last_invocation(&self, tool: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().rev().find(|i| i.name == tool)
    }

    /// Whether a given tool was invoked at all.
    pub fn invoked(&self, tool: &str) -> bool {
        self.invocations.iter().any(|i| i.name == tool)
    }
}

// ─── Runner ─────────────────────────────────────────────────────────────────

/// Run the tool loop for one agent turn.
///
/// `allowed_tools` is both the schema list sent to the model and the
/// execution allowlist.
pub async fn run_tool_loop(
    provider: &dyn ChatProvider,
    toolbox: &Toolbox,
    thread_id: &str,
    system_prompt: &str,
    user_message: &str,
    allowed_tools: &[&str],
    step_limit: usize,
) -> Result<LoopOutcome, AgentError> {
    let tool_defs = definitions(allowed_tools);
    let mut messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_message),
    ];
    let mut outcome = LoopOutcome::default();

    for step in 0..step_limit {
        let response: ChatOutcome = provider
            .complete(messages.clone(), Some(tool_defs.clone()))
            .await?;

        if response.tool_calls.is_empty() {
            let text = response.text.unwrap_or_default();
            tracing::debug!(thread_id, step, chars = text.len(), "agent produced final text");
            outcome.final_text = Some(text);
            return Ok(outcome);
        }

        messages.push(ChatMessage::assistant_tool_calls(&response.tool_calls));

        for call in &response.tool_calls {
            let result = if allowed_tools.contains(&call.name.as_str()) {
                toolbox.execute(thread_id, &call.name, &call.arguments).await
            } else {
                tracing::warn!(
                    thread_id,
                    tool = %call.name,
                    "agent requested tool outside its allowed set"
                );
                serde_json::json!({
                    "error": format!("tool '{}' is not available to this agent", call.name)
                })
            };

            let observation = match &result {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            messages.push(ChatMessage::tool_result(&call.id, observation));

            outcome.invocations.push(ToolInvocation {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result,
            });
        }

        tracing::debug!(
            thread_id,
            step,
            tools = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "agent loop round completed"
        );
    }

    tracing::warn!(thread_id, step_limit, "agent loop hit step limit");
    Err(AgentError::StepLimitExceeded { limit: step_limit })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
