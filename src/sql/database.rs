//! Read-only SQLite access for the portfolio table.
//!
//! Uses `rusqlite` with a shared connection behind a mutex; queries run on
//! the blocking thread pool so the async agents never park an executor
//! thread on SQLite. The connection carries no transactional state — every
//! query is independent.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::errors::DatabaseError;
use crate::memory::types::Row;

/// Canonical schema for the analytics table. Embedded verbatim in the
/// SQL-generation prompt so the model sees exact column names and types.
pub const APP_PORTFOLIO_SCHEMA: &str = "\
CREATE TABLE app_portfolio (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name TEXT NOT NULL,
    platform TEXT NOT NULL CHECK(platform IN ('iOS', 'Android')),
    date DATE NOT NULL,
    country TEXT NOT NULL,
    installs INTEGER DEFAULT 0,
    in_app_revenue DECIMAL(10, 2) DEFAULT 0.0,
    ads_revenue DECIMAL(10, 2) DEFAULT 0.0,
    ua_cost DECIMAL(10, 2) DEFAULT 0.0
);";

// ─── Database ───────────────────────────────────────────────────────────────

/// Handle to the read-only analytics database.
///
/// Clone-cheap: clones share the underlying connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|e| DatabaseError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (tests, ephemeral deployments).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|e| DatabaseError::Open {
            path: ":memory:".into(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a schema script against the database (bootstrap path).
    pub fn initialize(&self, schema_sql: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute_batch(schema_sql)
            .map_err(|e| DatabaseError::Initialize {
                reason: e.to_string(),
            })
    }

    /// Execute a SELECT and collect rows as column-ordered maps.
    ///
    /// Runs on the blocking pool; the caller is expected to have validated
    /// the statement already.
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("database mutex poisoned");
            run_query(&conn, &sql)
        })
        .await
        .map_err(|e| DatabaseError::Query {
            reason: format!("blocking task failed: {e}"),
        })?
    }

    /// Synchronous query path for tests and setup code.
    pub fn query_blocking(&self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        run_query(&conn, sql)
    }

    /// Total row count of the portfolio table.
    pub fn count_records(&self, table_name: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table_name}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in column_names.iter().enumerate() {
            map.insert(name.clone(), value_to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

/// Convert a SQLite value to JSON, keeping integers and reals distinct.
fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<{} bytes>", b.len())),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
