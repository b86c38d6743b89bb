//! Specialized agents: one per intent.
//!
//! - [`sql_query::SqlQueryAgent`] — LLM tool loop over generate/execute/format
//! - [`csv_export::CsvExportAgent`] — deterministic cache-reuse export path
//! - [`sql_retrieval::SqlRetrievalAgent`] — deterministic cached-SQL lookup
//! - [`off_topic::OffTopicAgent`] — polite redirect, no tools

pub mod csv_export;
pub mod off_topic;
pub mod prompts;
pub mod runner;
pub mod sql_query;
pub mod sql_retrieval;

use std::path::PathBuf;

/// What an agent run hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Chat-ready response text.
    pub text: String,
    /// A generated export for the transport to upload, if any.
    pub csv_file: Option<PathBuf>,
}

impl AgentReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            csv_file: None,
        }
    }
}
