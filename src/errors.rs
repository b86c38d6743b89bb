//! Crate-level error taxonomy.
//!
//! Errors never cross the orchestrator boundary: every variant here maps to
//! user-facing text before a reply is persisted. Validator rejections and
//! SQL execution failures are *values* (`QueryResult { success: false }`),
//! not members of this taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::errors::LlmError;

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Database-layer failure (connection or statement level).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to open database at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("query failed: {reason}")]
    Query { reason: String },

    #[error("schema initialization failed: {reason}")]
    Initialize { reason: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        DatabaseError::Query {
            reason: e.to_string(),
        }
    }
}

/// Failure while constructing the application context at startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Failure inside a specialized agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The LLM provider failed after bounded retries.
    #[error("language model unavailable: {0}")]
    Provider(#[from] LlmError),

    /// The tool loop hit the step limit without a final answer.
    #[error("agent exceeded {limit} tool-loop steps without finishing")]
    StepLimitExceeded { limit: usize },

    /// CSV file generation failed.
    #[error("csv export failed: {reason}")]
    CsvExport { reason: String },
}

impl AgentError {
    /// The user-facing text the orchestrator persists for this failure.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Provider(e) => format!(
                "I couldn't reach the language model to process your request ({e}). \
                 Please try again in a moment."
            ),
            AgentError::StepLimitExceeded { .. } => {
                "I couldn't finish processing your request within the allowed number of \
                 steps. Please try rephrasing the question."
                    .to_string()
            }
            AgentError::CsvExport { reason } => {
                format!("I couldn't generate the CSV export: {reason}")
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_errors_render_user_text() {
        let e = AgentError::StepLimitExceeded { limit: 10 };
        assert!(e.user_message().contains("rephrasing"));

        let e = AgentError::CsvExport {
            reason: "empty data".into(),
        };
        assert!(e.user_message().contains("empty data"));
    }

    #[test]
    fn database_error_from_rusqlite() {
        let e: DatabaseError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(e, DatabaseError::Query { .. }));
    }
}
