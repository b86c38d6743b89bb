//! SQL validator — enforces the read-only contract before execution.
//!
//! Layered checks: a SELECT/WITH whitelist on the statement head, a
//! whole-word keyword blacklist, a multiple-statement guard, and a required
//! table reference. Normalization (uppercase + whitespace collapse) happens
//! before any check so casing tricks don't bypass the rules.

/// Keywords that must never appear as a whole word in an accepted statement.
const BLACKLISTED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "REPLACE", "GRANT",
    "REVOKE", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "EXEC", "EXECUTE",
];

/// Validator for read-only, single-statement, table-bound queries.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    table_name: String,
}

impl SqlValidator {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    /// Check a statement; `Err` carries the rejection reason.
    pub fn validate(&self, sql: &str) -> Result<(), String> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err("Empty query".to_string());
        }

        let normalized = normalize(trimmed);

        if !normalized.starts_with("SELECT") && !normalized.starts_with("WITH") {
            return Err("Only SELECT queries are allowed".to_string());
        }

        for keyword in BLACKLISTED_KEYWORDS {
            if contains_word(&normalized, keyword) {
                return Err(format!("Dangerous keyword '{keyword}' is not allowed"));
            }
        }

        if has_second_statement(trimmed) {
            return Err("Multiple statements are not allowed".to_string());
        }

        if !sql.to_lowercase().contains(&self.table_name.to_lowercase()) {
            return Err(format!(
                "Query must reference the '{}' table",
                self.table_name
            ));
        }

        Ok(())
    }
}

/// Uppercase and collapse all whitespace runs to single spaces.
fn normalize(sql: &str) -> String {
    sql.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment: `word` bounded by non-identifier characters.
fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_ident_char(bytes[abs - 1]);
        let after = abs + word.len();
        let after_ok = after >= bytes.len() || !is_ident_char(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when a semicolon is followed by anything other than whitespace or
/// SQL comments. A trailing semicolon is tolerated.
fn has_second_statement(sql: &str) -> bool {
    let Some(semi) = sql.find(';') else {
        return false;
    };

    let mut rest = &sql[semi + 1..];
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return false;
        }
        if let Some(stripped) = rest.strip_prefix("--") {
            match stripped.find('\n') {
                Some(nl) => rest = &stripped[nl + 1..],
                None => return false,
            }
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            match stripped.find("*/") {
                Some(end) => rest = &stripped[end + 2..],
                None => return false,
            }
        } else {
            return true;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
