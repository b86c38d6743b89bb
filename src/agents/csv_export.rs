//! CSV-Export agent: the cache-reuse path for file exports.
//!
//! This agent never generates or executes SQL and never calls the LLM: the
//! export either reuses the thread's most recent successful results or asks
//! the user to run a query first. The transport uploads the returned file
//! and is expected to call `cleanup_export` afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::AgentError;
use crate::memory::types::Row;
use crate::tools::Toolbox;

use super::prompts::{EXPORT_CONFIRMATION, EXPORT_NO_RESULTS};
use super::AgentReply;

pub struct CsvExportAgent {
    toolbox: Arc<Toolbox>,
}

impl CsvExportAgent {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }

    /// Export the thread's cached results to a CSV file.
    pub async fn run(&self, thread_id: &str) -> Result<AgentReply, AgentError> {
        let cached = self.toolbox.get_cached_results(thread_id);

        if cached["results_found"] != serde_json::Value::Bool(true) {
            tracing::info!(thread_id, "csv export requested without cached results");
            return Ok(AgentReply::text_only(EXPORT_NO_RESULTS));
        }

        let data: Vec<Row> = serde_json::from_value(cached["data"].clone()).unwrap_or_default();
        if data.is_empty() {
            return Ok(AgentReply::text_only(EXPORT_NO_RESULTS));
        }

        let path = self
            .toolbox
            .generate_csv(&data, None)
            .map_err(|reason| AgentError::CsvExport { reason })?;

        tracing::info!(thread_id, path = %path, rows = data.len(), "csv export complete");
        Ok(AgentReply {
            text: EXPORT_CONFIRMATION.to_string(),
            csv_file: Some(PathBuf::from(path)),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
