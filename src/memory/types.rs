//! Data model for per-thread conversational state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Messages ───────────────────────────────────────────────────────────────

/// Role of a stored conversation turn.
///
/// `Summary` marks a compressed replacement for older user/assistant pairs;
/// it is produced only by the memory store's compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Summary,
}

/// A single role-tagged turn in a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Summary,
            content: content.into(),
        }
    }
}

// ─── Query results ──────────────────────────────────────────────────────────

/// A row is a column-ordered map. `serde_json` runs with `preserve_order`,
/// so insertion order survives serialization round-trips.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of executing one SQL statement against the portfolio database.
///
/// Validator rejections and database errors both land here as
/// `success: false` values; the agent loop treats them as observations,
/// not exceptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<Row>,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub error: Option<String>,
    /// The executed SQL. The formatter inspects it for aggregation and
    /// ordering indicators when building the assumptions note.
    pub query: String,
}

impl QueryResult {
    /// Build a failure result carrying the offending SQL and a reason.
    pub fn failure(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            row_count: 0,
            columns: Vec::new(),
            error: Some(error.into()),
            query: query.into(),
        }
    }
}

// ─── Query records ──────────────────────────────────────────────────────────

/// A persisted `(sql, question, results, timestamp)` tuple enabling the
/// export and retrieval reuse paths. Created only after a successful
/// generate → execute sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    pub question: String,
    pub results: Option<QueryResult>,
    pub timestamp: DateTime<Utc>,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
