//! Tool layer — the six named capabilities agents invoke.
//!
//! Tools are the only path from agents to side effects (LLM-backed SQL
//! generation, database execution, file output, cache reads). Each tool is
//! registered in [`catalog::ALL_TOOLS`] with a name, description, and
//! parameter schema; [`Toolbox`] executes them by name and returns JSON
//! observations. Failures are values in the observation, never panics.

pub mod csv_export;
pub mod formatting;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::BotConfig;
use crate::llm::types::{ChatMessage, FunctionDefinition, ToolDefinition};
use crate::llm::ChatProvider;
use crate::memory::types::{QueryResult, Row};
use crate::memory::MemoryStore;
use crate::sql::{Database, SqlValidator, APP_PORTFOLIO_SCHEMA};

// ─── Tool names ─────────────────────────────────────────────────────────────

pub const GENERATE_SQL: &str = "generate_sql";
pub const EXECUTE_SQL: &str = "execute_sql";
pub const FORMAT_RESULT: &str = "format_result";
pub const GENERATE_CSV: &str = "generate_csv";
pub const GET_SQL_HISTORY: &str = "get_sql_history";
pub const GET_CACHED_RESULTS: &str = "get_cached_results";

// ─── Catalog ────────────────────────────────────────────────────────────────

/// Static registration entry for one tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: fn() -> Value,
}

/// The full tool registry, in declaration order.
pub const ALL_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: GENERATE_SQL,
        description: "Generate a SQL SELECT query from a natural language question about the \
                      app portfolio database. Pass the user's question and optionally recent \
                      conversation turns for follow-up context.",
        parameters: generate_sql_params,
    },
    ToolSpec {
        name: EXECUTE_SQL,
        description: "Validate and execute a SQL SELECT query against the app portfolio \
                      database. Returns rows, column names, and a success flag.",
        parameters: execute_sql_params,
    },
    ToolSpec {
        name: FORMAT_RESULT,
        description: "Format query results for chat display: plain text for simple results, \
                      a markdown table for larger ones, with assumption notes when relevant.",
        parameters: format_result_params,
    },
    ToolSpec {
        name: GENERATE_CSV,
        description: "Generate a CSV file from query result rows. Returns the file path.",
        parameters: generate_csv_params,
    },
    ToolSpec {
        name: GET_SQL_HISTORY,
        description: "Retrieve a previously executed SQL query for this thread, optionally \
                      matched by a description of the original question.",
        parameters: get_sql_history_params,
    },
    ToolSpec {
        name: GET_CACHED_RESULTS,
        description: "Retrieve the most recent successful query results for this thread, \
                      for reuse without re-executing SQL.",
        parameters: get_cached_results_params,
    },
];

fn generate_sql_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {"type": "string", "description": "Natural language question"},
            "conversation_history": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Recent conversation turns for context"
            }
        },
        "required": ["question"]
    })
}

fn execute_sql_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sql_query": {"type": "string", "description": "SQL SELECT statement"}
        },
        "required": ["sql_query"]
    })
}

fn format_result_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "results": {"type": "object", "description": "Result object from execute_sql"},
            "question": {"type": "string", "description": "Original user question"}
        },
        "required": ["results", "question"]
    })
}

fn generate_csv_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "data": {"type": "array", "items": {"type": "object"}},
            "filename": {"type": "string"}
        },
        "required": ["data"]
    })
}

fn get_sql_history_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query_description": {
                "type": "string",
                "description": "Optional description of the query to find"
            }
        }
    })
}

fn get_cached_results_params() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Build OpenAI-format tool definitions for a subset of the catalog.
pub fn definitions(names: &[&str]) -> Vec<ToolDefinition> {
    ALL_TOOLS
        .iter()
        .filter(|spec| names.contains(&spec.name))
        .map(|spec| ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: (spec.parameters)(),
            },
        })
        .collect()
}

// ─── Toolbox ────────────────────────────────────────────────────────────────

/// Executes catalog tools against the collaborator services.
pub struct Toolbox {
    memory: Arc<MemoryStore>,
    database: Database,
    validator: SqlValidator,
    provider: Arc<dyn ChatProvider>,
    config: Arc<BotConfig>,
}

impl Toolbox {
    pub fn new(
        memory: Arc<MemoryStore>,
        database: Database,
        provider: Arc<dyn ChatProvider>,
        config: Arc<BotConfig>,
    ) -> Self {
        Self {
            memory,
            database,
            validator: SqlValidator::new(config.table_name.clone()),
            provider,
            config,
        }
    }

    /// Dispatch a tool call by name, returning the JSON observation for the
    /// agent loop. Unknown names produce an error observation.
    pub async fn execute(&self, thread_id: &str, name: &str, arguments: &Value) -> Value {
        tracing::debug!(thread_id, tool = name, "executing tool");
        match name {
            GENERATE_SQL => {
                let question = str_arg(arguments, "question").unwrap_or_default();
                let history: Vec<String> = arguments
                    .get("conversation_history")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                Value::String(self.generate_sql(&question, &history).await)
            }
            EXECUTE_SQL => {
                let sql = str_arg(arguments, "sql_query").unwrap_or_default();
                let result = self.execute_sql(&sql).await;
                serde_json::to_value(result).unwrap_or(Value::Null)
            }
            FORMAT_RESULT => {
                let question = str_arg(arguments, "question").unwrap_or_default();
                match arguments
                    .get("results")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<QueryResult>(v).ok())
                {
                    Some(results) => {
                        Value::String(formatting::format_result(&results, &question))
                    }
                    None => Value::String(
                        "Error formatting results: missing or malformed 'results' argument"
                            .to_string(),
                    ),
                }
            }
            GENERATE_CSV => {
                let data: Vec<Row> = arguments
                    .get("data")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                let filename = str_arg(arguments, "filename");
                match self.generate_csv(&data, filename.as_deref()) {
                    Ok(path) => Value::String(path),
                    Err(e) => Value::String(format!("ERROR: {e}")),
                }
            }
            GET_SQL_HISTORY => {
                let description = str_arg(arguments, "query_description");
                self.get_sql_history(thread_id, description.as_deref())
            }
            GET_CACHED_RESULTS => self.get_cached_results(thread_id),
            other => {
                tracing::warn!(tool = other, "unknown tool requested");
                json!({"error": format!("unknown tool '{other}'")})
            }
        }
    }

    // ─── generate_sql ───────────────────────────────────────────────────

    /// Generate SQL from a natural language question via the LLM.
    ///
    /// Failures come back as a string prefixed `ERROR:` so the agent loop
    /// can observe and surface them.
    pub async fn generate_sql(&self, question: &str, history: &[String]) -> String {
        let system = format!(
            "You are a SQL query generator for an app portfolio database.\n\n\
             Database Schema:\n{APP_PORTFOLIO_SCHEMA}\n\n\
             Rules:\n\
             1. Generate ONLY SELECT queries (no INSERT, UPDATE, DELETE, DROP, etc.)\n\
             2. Always reference the '{}' table\n\
             3. Use proper SQL syntax for SQLite\n\
             4. Consider conversation context when provided\n\
             5. Use appropriate aggregations (COUNT, SUM, AVG, MAX, MIN) when needed\n\
             6. Use WHERE clauses for filtering, ORDER BY for sorting, LIMIT for top-N\n\
             7. Use DISTINCT when counting unique values\n\n\
             Return ONLY the SQL query, no explanations or markdown formatting.",
            self.config.table_name
        );

        let mut user = format!("Generate a SQL query for this question: {question}");
        if !history.is_empty() {
            user.push_str("\n\nPrevious conversation context:");
            for (i, turn) in history.iter().rev().take(3).rev().enumerate() {
                user.push_str(&format!("\n{}. {turn}", i + 1));
            }
        }

        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        match self.provider.complete(messages, None).await {
            Ok(outcome) => {
                let sql = strip_markdown_fences(outcome.text.as_deref().unwrap_or(""));
                if sql.is_empty() {
                    "ERROR: SQL generation produced no output".to_string()
                } else {
                    tracing::info!(sql = %sql, "generated sql");
                    sql
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "sql generation failed");
                format!("ERROR: Failed to generate SQL query: {e}")
            }
        }
    }

    // ─── execute_sql ────────────────────────────────────────────────────

    /// Validate and execute a statement; both rejection and database errors
    /// become `success: false` results.
    pub async fn execute_sql(&self, sql: &str) -> QueryResult {
        if let Err(reason) = self.validator.validate(sql) {
            tracing::warn!(sql = %sql, reason = %reason, "query rejected by validator");
            return QueryResult::failure(sql, reason);
        }

        match self.database.query(sql).await {
            Ok(rows) => {
                let columns: Vec<String> = rows
                    .first()
                    .map(|r| r.keys().cloned().collect())
                    .unwrap_or_default();
                tracing::info!(sql = %sql, rows = rows.len(), "query executed");
                QueryResult {
                    success: true,
                    row_count: rows.len(),
                    columns,
                    data: rows,
                    error: None,
                    query: sql.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(sql = %sql, error = %e, "query execution failed");
                QueryResult::failure(sql, e.to_string())
            }
        }
    }

    // ─── generate_csv ───────────────────────────────────────────────────

    /// Write rows to a CSV file in the export directory.
    pub fn generate_csv(&self, data: &[Row], filename: Option<&str>) -> Result<String, String> {
        csv_export::write_csv(data, &self.config.export_dir, filename)
            .map(|p| p.to_string_lossy().into_owned())
    }

    // ─── get_sql_history ────────────────────────────────────────────────

    /// Structured lookup of a previously executed query.
    pub fn get_sql_history(&self, thread_id: &str, description: Option<&str>) -> Value {
        match self.memory.find_sql_by_description(thread_id, description) {
            Some(record) => json!({
                "sql_found": true,
                "sql_statement": record.sql,
                "question": record.question,
                "query_timestamp": record.timestamp.to_rfc3339(),
                "message": match description {
                    Some(d) => format!("Found SQL query matching: {d}"),
                    None => "Retrieved last SQL query from thread history.".to_string(),
                },
            }),
            None => json!({
                "sql_found": false,
                "sql_statement": Value::Null,
                "question": Value::Null,
                "query_timestamp": Value::Null,
                "message": "No SQL queries found for this thread. Please run a query first.",
            }),
        }
    }

    // ─── get_cached_results ─────────────────────────────────────────────

    /// Most recent successful results for the thread, or a not-found payload.
    pub fn get_cached_results(&self, thread_id: &str) -> Value {
        let last = self.memory.get_last_sql_query(thread_id);
        match self.memory.get_last_query_results(thread_id) {
            Some(results) => json!({
                "results_found": true,
                "data": results.data,
                "row_count": results.row_count,
                "sql": results.query,
                "timestamp": last.map(|q| q.timestamp.to_rfc3339()),
                "message": format!("Retrieved {} rows from last query.", results.row_count),
            }),
            None => json!({
                "results_found": false,
                "data": Value::Null,
                "row_count": 0,
                "sql": Value::Null,
                "timestamp": Value::Null,
                "message": "No previous query results found. Please run a query first.",
            }),
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn str_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Strip a surrounding markdown code fence (``` or ```sql) from model output.
pub fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines
        .first()
        .map(|l| l.trim_start().starts_with("```"))
        .unwrap_or(false)
    {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::llm::client::testing::ScriptedProvider;
    use crate::llm::types::ChatOutcome;
    use crate::sql::APP_PORTFOLIO_SCHEMA;

    fn toolbox_with(provider: ScriptedProvider) -> (Toolbox, Arc<MemoryStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(BotConfig {
            export_dir: dir.path().to_path_buf(),
            ..BotConfig::default()
        });
        let memory = Arc::new(MemoryStore::new(config.memory.clone()));
        let database = Database::open_in_memory().unwrap();
        database.initialize(APP_PORTFOLIO_SCHEMA).unwrap();
        let toolbox = Toolbox::new(
            Arc::clone(&memory),
            database,
            Arc::new(provider),
            config,
        );
        (toolbox, memory, dir)
    }

    fn seed_rows(toolbox: &Toolbox) {
        toolbox
            .database
            .initialize(
                "INSERT INTO app_portfolio \
                 (app_name, platform, date, country, installs, in_app_revenue, ads_revenue, ua_cost) VALUES \
                 ('Alpha', 'iOS', '2024-01-01', 'US', 100, 10.0, 1.0, 0.5), \
                 ('Beta', 'Android', '2024-01-02', 'NL', 200, 20.0, 2.0, 1.0)",
            )
            .unwrap();
    }

    #[test]
    fn catalog_has_six_tools() {
        assert_eq!(ALL_TOOLS.len(), 6);
        let names: Vec<&str> = ALL_TOOLS.iter().map(|t| t.name).collect();
        assert!(names.contains(&GENERATE_SQL));
        assert!(names.contains(&GET_CACHED_RESULTS));
    }

    #[test]
    fn definitions_filter_by_name() {
        let defs = definitions(&[GENERATE_SQL, EXECUTE_SQL]);
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().all(|d| d.r#type == "function"));
        let defs = definitions(&[GET_SQL_HISTORY]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, GET_SQL_HISTORY);
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(
            strip_markdown_fences("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
        assert_eq!(strip_markdown_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_markdown_fences("SELECT 1"), "SELECT 1");
        assert_eq!(strip_markdown_fences("  SELECT 1  "), "SELECT 1");
    }

    #[tokio::test]
    async fn generate_sql_strips_fences_and_logs() {
        let provider = ScriptedProvider::new(vec![ChatOutcome::text(
            "```sql\nSELECT COUNT(*) FROM app_portfolio\n```",
        )]);
        let (toolbox, _memory, _dir) = toolbox_with(provider);
        let sql = toolbox.generate_sql("how many rows?", &[]).await;
        assert_eq!(sql, "SELECT COUNT(*) FROM app_portfolio");
    }

    #[tokio::test]
    async fn generate_sql_surfaces_provider_failure() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let sql = toolbox.generate_sql("q", &[]).await;
        assert!(sql.starts_with("ERROR:"));
    }

    #[tokio::test]
    async fn generate_sql_rejects_empty_output() {
        let provider = ScriptedProvider::new(vec![ChatOutcome::text("   ")]);
        let (toolbox, _memory, _dir) = toolbox_with(provider);
        let sql = toolbox.generate_sql("q", &[]).await;
        assert!(sql.starts_with("ERROR:"));
    }

    #[tokio::test]
    async fn execute_sql_happy_path() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        seed_rows(&toolbox);
        let result = toolbox
            .execute_sql("SELECT app_name FROM app_portfolio ORDER BY app_name")
            .await;
        assert!(result.success);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns, vec!["app_name"]);
    }

    #[tokio::test]
    async fn execute_sql_validator_rejection_is_value() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let result = toolbox.execute_sql("DROP TABLE app_portfolio").await;
        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().contains("SELECT"));
    }

    #[tokio::test]
    async fn execute_sql_db_error_is_value() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let result = toolbox
            .execute_sql("SELECT nonexistent FROM app_portfolio")
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_error_observation() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let out = toolbox.execute("t1", "launch_rockets", &json!({})).await;
        assert!(out["error"]
            .as_str()
            .unwrap()
            .contains("unknown tool"));
    }

    #[tokio::test]
    async fn get_sql_history_not_found_payload() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let out = toolbox.get_sql_history("t1", None);
        assert_eq!(out["sql_found"], json!(false));
        assert!(out["message"]
            .as_str()
            .unwrap()
            .contains("Please run a query first"));
    }

    #[tokio::test]
    async fn get_sql_history_finds_by_description() {
        let (toolbox, memory, _dir) = toolbox_with(ScriptedProvider::failing());
        memory.store_sql_query("t1", "SELECT a FROM app_portfolio", "how many apps", None);
        memory.store_sql_query("t1", "SELECT b FROM app_portfolio", "revenue by country", None);

        let out = toolbox.get_sql_history("t1", Some("how many apps"));
        assert_eq!(out["sql_found"], json!(true));
        assert_eq!(out["sql_statement"], json!("SELECT a FROM app_portfolio"));
        assert_eq!(out["question"], json!("how many apps"));
    }

    #[tokio::test]
    async fn get_cached_results_round_trip() {
        let (toolbox, memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let mut row = Row::new();
        row.insert("total".into(), json!(42));
        let results = QueryResult {
            success: true,
            data: vec![row],
            row_count: 1,
            columns: vec!["total".into()],
            error: None,
            query: "SELECT COUNT(*) AS total FROM app_portfolio".into(),
        };
        memory.store_sql_query("t1", results.query.clone(), "count", Some(results));

        let out = toolbox.get_cached_results("t1");
        assert_eq!(out["results_found"], json!(true));
        assert_eq!(out["row_count"], json!(1));
        assert_eq!(out["data"][0]["total"], json!(42));
        assert_eq!(
            out["sql"],
            json!("SELECT COUNT(*) AS total FROM app_portfolio")
        );
    }

    #[tokio::test]
    async fn get_cached_results_miss() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let out = toolbox.get_cached_results("empty-thread");
        assert_eq!(out["results_found"], json!(false));
        assert!(out["message"]
            .as_str()
            .unwrap()
            .contains("Please run a query first"));
    }

    #[tokio::test]
    async fn dispatch_format_result() {
        let (toolbox, _memory, _dir) = toolbox_with(ScriptedProvider::failing());
        let mut row = Row::new();
        row.insert("n".into(), json!(7));
        let results = QueryResult {
            success: true,
            data: vec![row],
            row_count: 1,
            columns: vec!["n".into()],
            error: None,
            query: "SELECT 7 AS n FROM app_portfolio".into(),
        };
        let out = toolbox
            .execute(
                "t1",
                FORMAT_RESULT,
                &json!({"results": results, "question": "seven?"}),
            )
            .await;
        assert_eq!(out, json!("7"));
    }
}
