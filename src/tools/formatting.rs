//! Query result formatting for chat display.
//!
//! Decision rule: a single scalar or a single row with up to three columns
//! renders as plain text; anything wider or taller becomes a pipe-delimited
//! markdown table. Multi-row output gets an italicized assumptions note when
//! the question or SQL carries aggregation, ordering, ranking, or timeframe
//! indicators.

use serde_json::Value;

use crate::memory::types::{QueryResult, Row};

/// Columns hidden from display output (internal keys).
const HIDDEN_COLUMNS: &[&str] = &["id"];

// ─── Query type ─────────────────────────────────────────────────────────────

/// Coarse statement classification feeding formatting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    SimpleCount,
    Aggregation,
    List,
    Complex,
}

/// Classify a statement by its aggregate/grouping shape.
pub fn query_type(sql: &str) -> QueryType {
    let upper = sql.to_uppercase();
    let collapsed: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.contains("SELECT COUNT") && !collapsed.contains("GROUP BY") {
        return QueryType::SimpleCount;
    }
    if collapsed.contains("GROUP BY") {
        return QueryType::Aggregation;
    }
    if ["SUM(", "AVG(", "MAX(", "MIN(", "COUNT("]
        .iter()
        .any(|f| collapsed.contains(f))
    {
        return QueryType::Aggregation;
    }
    if ["JOIN", "UNION", "HAVING"].iter().any(|k| collapsed.contains(k)) {
        return QueryType::Complex;
    }
    QueryType::List
}

// ─── Formatting entry point ─────────────────────────────────────────────────

/// Format a query result for chat display.
pub fn format_result(results: &QueryResult, question: &str) -> String {
    if !results.success {
        let reason = results.error.as_deref().unwrap_or("Unknown error");
        return format!("Error: {reason}");
    }
    if results.data.is_empty() {
        return "No results found.".to_string();
    }

    let formatted = if use_simple_format(&results.data) {
        format_simple(&results.data)
    } else {
        format_table(&results.data)
    };

    // Assumptions only accompany multi-row output; a lone scalar answer
    // stays bare.
    if results.data.len() > 1 {
        if let Some(note) = assumptions(&results.query, question) {
            return format!("{formatted}\n\n*Note: {note}*");
        }
    }
    formatted
}

/// Simple text applies to a single scalar or one row of at most 3 columns.
fn use_simple_format(data: &[Row]) -> bool {
    data.len() <= 1 && data[0].len() <= 3
}

fn format_simple(data: &[Row]) -> String {
    let row = &data[0];
    let mut visible: Vec<(&String, &Value)> = row
        .iter()
        .filter(|(k, _)| !HIDDEN_COLUMNS.contains(&k.as_str()))
        .collect();
    // A result selecting only hidden columns still renders its values.
    if visible.is_empty() {
        visible = row.iter().collect();
    }

    match visible.len() {
        0 => String::new(),
        1 => format_value(visible[0].1),
        2 => format!(
            "{}: {}",
            format_value(visible[0].1),
            format_value(visible[1].1)
        ),
        _ => visible
            .iter()
            .map(|(k, v)| format!("{k}: {}", format_value(v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn format_table(data: &[Row]) -> String {
    let columns: Vec<&String> = data[0]
        .keys()
        .filter(|k| !HIDDEN_COLUMNS.contains(&k.as_str()))
        .collect();
    let columns = if columns.is_empty() {
        data[0].keys().collect()
    } else {
        columns
    };

    let header = columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    let separator = vec!["---"; columns.len()].join(" | ");

    let mut lines = vec![header, separator];
    for row in data {
        let cells = columns
            .iter()
            .map(|c| row.get(*c).map(format_value).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" | ");
        lines.push(cells);
    }
    lines.join("\n")
}

/// Render a cell: integers without decimals, reals to two places, nulls
/// empty, everything else verbatim.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    format!("{}", f as i64)
                } else {
                    format!("{f:.2}")
                }
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Assumptions ────────────────────────────────────────────────────────────

/// Collect assumption fragments from the SQL and the originating question.
/// Returns `None` when no indicator is present.
fn assumptions(sql: &str, question: &str) -> Option<String> {
    let upper = sql.to_uppercase();
    let question_lower = question.to_lowercase();
    let mut parts: Vec<String> = Vec::new();

    if upper.contains("SUM(") {
        parts.push("Total values calculated across all matching records".into());
    } else if upper.contains("AVG(") {
        parts.push("Average calculated across all matching records".into());
    } else if upper.contains("COUNT(") {
        parts.push("Count includes all matching records".into());
    }

    if upper.contains("ORDER BY") {
        if upper.contains("DESC") {
            parts.push("Results sorted in descending order".into());
        } else {
            parts.push("Results sorted in ascending order".into());
        }
    }

    if let Some(n) = limit_value(&upper) {
        parts.push(format!("Showing top {n} results"));
    } else if ["top", "best", "most"]
        .iter()
        .any(|w| question_lower.split_whitespace().any(|t| t == *w))
    {
        parts.push("Ranking inferred from the question".into());
    }

    if upper.contains("DATE") {
        if upper.contains("2024") || upper.contains("2025") {
            parts.push("Timeframe based on dates in query".into());
        } else {
            parts.push("Timeframe: all available data".into());
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

/// Extract the numeric operand of a `LIMIT n` clause, if present.
fn limit_value(upper_sql: &str) -> Option<u64> {
    let mut tokens = upper_sql.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "LIMIT" {
            return tokens
                .next()
                .map(|t| t.trim_end_matches(';'))
                .and_then(|t| t.parse().ok());
        }
    }
    None
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    fn ok_result(sql: &str, data: Vec<Row>) -> QueryResult {
        let columns = data
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        QueryResult {
            success: true,
            row_count: data.len(),
            columns,
            data,
            error: None,
            query: sql.to_string(),
        }
    }

    #[test]
    fn empty_data_has_fixed_message() {
        let r = ok_result("SELECT * FROM app_portfolio WHERE 1=0", vec![]);
        assert_eq!(format_result(&r, "anything"), "No results found.");
    }

    #[test]
    fn single_scalar_renders_bare() {
        let r = ok_result(
            "SELECT COUNT(DISTINCT app_name) FROM app_portfolio",
            vec![row(&[("COUNT(DISTINCT app_name)", Value::from(49))])],
        );
        assert_eq!(format_result(&r, "how many apps do we have?"), "49");
    }

    #[test]
    fn two_column_row_renders_as_pair() {
        let r = ok_result(
            "SELECT country, SUM(in_app_revenue) FROM app_portfolio",
            vec![row(&[
                ("country", Value::from("Netherlands")),
                ("total", Value::from(67125.314)),
            ])],
        );
        assert_eq!(format_result(&r, "revenue"), "Netherlands: 67125.31");
    }

    #[test]
    fn multi_row_renders_pipe_table() {
        let r = ok_result(
            "SELECT app_name, installs FROM app_portfolio",
            vec![
                row(&[("app_name", Value::from("Alpha")), ("installs", Value::from(100))]),
                row(&[("app_name", Value::from("Beta")), ("installs", Value::from(250))]),
            ],
        );
        let out = format_result(&r, "list the apps");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "app_name | installs");
        assert_eq!(lines[1], "--- | ---");
        assert_eq!(lines[2], "Alpha | 100");
        assert_eq!(lines[3], "Beta | 250");
    }

    #[test]
    fn all_hidden_single_row_still_renders() {
        let r = ok_result(
            "SELECT id FROM app_portfolio LIMIT 1",
            vec![row(&[("id", Value::from(7))])],
        );
        assert_eq!(format_result(&r, "first id"), "7");
    }

    #[test]
    fn id_column_hidden_from_table() {
        let r = ok_result(
            "SELECT * FROM app_portfolio",
            vec![
                row(&[("id", Value::from(1)), ("app_name", Value::from("Alpha"))]),
                row(&[("id", Value::from(2)), ("app_name", Value::from("Beta"))]),
            ],
        );
        let out = format_result(&r, "show everything");
        assert!(!out.lines().next().unwrap().contains("id"));
        assert!(out.contains("Alpha"));
    }

    #[test]
    fn error_result_is_user_friendly() {
        let r = QueryResult::failure("SELECT nope", "no such column: nope");
        assert_eq!(
            format_result(&r, "q"),
            "Error: no such column: nope"
        );
    }

    #[test]
    fn ordered_multi_row_gets_note() {
        let r = ok_result(
            "SELECT country, SUM(in_app_revenue) AS rev FROM app_portfolio GROUP BY country ORDER BY rev DESC LIMIT 5",
            vec![
                row(&[("country", Value::from("US")), ("rev", Value::from(10.0))]),
                row(&[("country", Value::from("NL")), ("rev", Value::from(5.0))]),
            ],
        );
        let out = format_result(&r, "top countries by revenue");
        assert!(out.contains("*Note: "));
        assert!(out.contains("Total values calculated across all matching records"));
        assert!(out.contains("Results sorted in descending order"));
        assert!(out.contains("Showing top 5 results"));
        assert!(out.contains("; "));
    }

    #[test]
    fn scalar_never_gets_note_despite_count() {
        let r = ok_result(
            "SELECT COUNT(*) FROM app_portfolio",
            vec![row(&[("COUNT(*)", Value::from(50))])],
        );
        assert_eq!(format_result(&r, "how many rows"), "50");
    }

    #[test]
    fn numeric_formatting_rules() {
        assert_eq!(format_value(&Value::from(42)), "42");
        assert_eq!(format_value(&Value::from(42.0)), "42");
        assert_eq!(format_value(&Value::from(1234.567)), "1234.57");
        assert_eq!(format_value(&Value::Null), "");
        assert_eq!(format_value(&Value::from("text")), "text");
    }

    #[test]
    fn query_type_classification() {
        assert_eq!(
            query_type("SELECT COUNT(*) FROM app_portfolio"),
            QueryType::SimpleCount
        );
        assert_eq!(
            query_type("SELECT country, SUM(x) FROM app_portfolio GROUP BY country"),
            QueryType::Aggregation
        );
        assert_eq!(
            query_type("SELECT AVG(installs) FROM app_portfolio"),
            QueryType::Aggregation
        );
        assert_eq!(
            query_type("SELECT app_name FROM app_portfolio"),
            QueryType::List
        );
        assert_eq!(
            query_type("SELECT a.x FROM app_portfolio a JOIN other b ON a.id = b.id"),
            QueryType::Complex
        );
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(limit_value("SELECT X LIMIT 10"), Some(10));
        assert_eq!(limit_value("SELECT X LIMIT 5;"), Some(5));
        assert_eq!(limit_value("SELECT X"), None);
    }
}
