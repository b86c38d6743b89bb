//! Intent router — deterministic keyword classification.
//!
//! Classifies without an LLM call for latency and cost. The cascade is
//! ordered: CSV export phrases, then SQL retrieval phrases, then off-topic
//! markers (suppressed by database keywords), then follow-up inheritance,
//! then the SQL-query default. Ambiguous greetings without explicit markers
//! intentionally fall through to `SqlQuery`; that misfire direction is a
//! documented product decision.

use serde::Serialize;

use crate::memory::types::{MessageRole, StoredMessage};

// ─── Intent ─────────────────────────────────────────────────────────────────

/// Coarse class of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    SqlQuery,
    CsvExport,
    SqlRetrieval,
    OffTopic,
}

/// A classification with its confidence and rationale.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub reasoning: String,
}

impl Classification {
    fn new(intent: Intent, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            intent,
            confidence,
            reasoning: reasoning.into(),
        }
    }
}

// ─── Keyword sets ───────────────────────────────────────────────────────────

/// Ordered word pairs: first word must appear before the second.
const CSV_ORDERED_PAIRS: &[(&str, &str)] = &[("export", "csv"), ("download", "csv")];
const CSV_PHRASES: &[&str] = &["save as csv", "csv file"];

const RETRIEVAL_ORDERED_PAIRS: &[(&str, &str)] = &[("show", "sql"), ("sql", "used")];
const RETRIEVAL_PHRASES: &[&str] = &["what sql", "which sql", "sql query"];

const OFF_TOPIC_MARKERS: &[&str] = &["hello", "hi", "how are you", "joke", "weather", "thanks"];

const DB_KEYWORDS: &[&str] = &[
    "app", "apps", "revenue", "install", "country", "platform", "ios", "android", "sql", "data",
    "table", "count", "how many", "what",
];

const FOLLOW_UP_PHRASES: &[&str] = &["what about", "how about", "same for"];

/// Maximum word count for a message to qualify as a follow-up.
const FOLLOW_UP_MAX_WORDS: usize = 6;

// ─── Classification ─────────────────────────────────────────────────────────

/// Classify a message given the thread history (which already contains the
/// message itself as the most recent user turn). Total over non-empty
/// strings; confidence is always in [0, 1].
pub fn classify(message: &str, history: &[StoredMessage]) -> Classification {
    if let Some(c) = classify_base(message) {
        return c;
    }

    if let Some(c) = classify_follow_up(message, history) {
        return c;
    }

    Classification::new(
        Intent::SqlQuery,
        0.8,
        "User wants to query the database (default classification)",
    )
}

/// Steps 1-3 of the cascade; `None` means no explicit marker matched.
fn classify_base(message: &str) -> Option<Classification> {
    let lower = message.to_lowercase();

    if CSV_ORDERED_PAIRS
        .iter()
        .any(|(a, b)| ordered_contains(&lower, a, b))
        || CSV_PHRASES.iter().any(|p| lower.contains(p))
    {
        return Some(Classification::new(
            Intent::CsvExport,
            0.9,
            "User requested a CSV export or file download",
        ));
    }

    if RETRIEVAL_ORDERED_PAIRS
        .iter()
        .any(|(a, b)| ordered_contains(&lower, a, b))
        || RETRIEVAL_PHRASES.iter().any(|p| lower.contains(p))
    {
        return Some(Classification::new(
            Intent::SqlRetrieval,
            0.9,
            "User wants to see a previously used SQL statement",
        ));
    }

    if OFF_TOPIC_MARKERS.iter().any(|m| lower.contains(m))
        && !DB_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        return Some(Classification::new(
            Intent::OffTopic,
            0.7,
            "Greeting or chitchat without database context",
        ));
    }

    None
}

/// Step 4: a short message with a follow-up marker inherits the previous
/// user turn's base intent when that was SQL query or CSV export.
fn classify_follow_up(message: &str, history: &[StoredMessage]) -> Option<Classification> {
    let has_assistant_turn = history.iter().any(|m| m.role == MessageRole::Assistant);
    if !has_assistant_turn {
        return None;
    }

    let lower = message.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.len() >= FOLLOW_UP_MAX_WORDS {
        return None;
    }

    let marked = FOLLOW_UP_PHRASES.iter().any(|p| lower.contains(p))
        || words.iter().any(|w| *w == "and");
    if !marked {
        return None;
    }

    let previous = previous_user_message(message, history)?;
    let inherited = classify_base(&previous.content)
        .map(|c| c.intent)
        .unwrap_or(Intent::SqlQuery);

    match inherited {
        Intent::SqlQuery | Intent::CsvExport => Some(Classification::new(
            inherited,
            0.8,
            "Short follow-up inheriting the previous request's intent",
        )),
        _ => None,
    }
}

/// The user message preceding the current one. The current message is the
/// last user turn in history, so we skip past it.
fn previous_user_message<'a>(
    message: &str,
    history: &'a [StoredMessage],
) -> Option<&'a StoredMessage> {
    let mut user_turns = history
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::User);
    let last = user_turns.next()?;
    if last.content == message {
        user_turns.next()
    } else {
        Some(last)
    }
}

/// True when `first` occurs before `second` in `haystack`.
fn ordered_contains(haystack: &str, first: &str, second: &str) -> bool {
    match (haystack.find(first), haystack.find(second)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::StoredMessage;

    fn no_history() -> Vec<StoredMessage> {
        Vec::new()
    }

    #[test]
    fn csv_export_phrases() {
        for msg in [
            "export this as csv",
            "please save as csv",
            "can you download the data to csv",
            "give me a csv file",
            "Export the results to CSV please",
        ] {
            let c = classify(msg, &no_history());
            assert_eq!(c.intent, Intent::CsvExport, "msg: {msg}");
            assert!((c.confidence - 0.9).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn sql_retrieval_phrases() {
        for msg in [
            "show me the SQL you used for how many apps",
            "what sql did you run",
            "which sql produced that",
            "the sql you used earlier",
            "show me that sql query",
        ] {
            let c = classify(msg, &no_history());
            assert_eq!(c.intent, Intent::SqlRetrieval, "msg: {msg}");
        }
    }

    #[test]
    fn csv_wins_over_retrieval_order() {
        // Tie-break by cascade order: export phrasing beats sql mention.
        let c = classify("export the sql query results as csv", &no_history());
        assert_eq!(c.intent, Intent::CsvExport);
    }

    #[test]
    fn off_topic_without_db_keywords() {
        for msg in ["Tell me a joke", "hello there friend", "thanks, bye now"] {
            let c = classify(msg, &no_history());
            assert_eq!(c.intent, Intent::OffTopic, "msg: {msg}");
            assert!((c.confidence - 0.7).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn greeting_with_db_keyword_stays_sql() {
        let c = classify("hello, how many apps do we have?", &no_history());
        assert_eq!(c.intent, Intent::SqlQuery);
    }

    #[test]
    fn whats_the_weather_hits_db_keyword_misfire() {
        // "what" is a database keyword, so this documented misfire lands on
        // the default rather than OffTopic.
        let c = classify("what's the weather", &no_history());
        assert_eq!(c.intent, Intent::SqlQuery);
    }

    #[test]
    fn default_is_sql_query() {
        let c = classify("how many apps do we have?", &no_history());
        assert_eq!(c.intent, Intent::SqlQuery);
        assert!((c.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn follow_up_inherits_sql_query() {
        let history = vec![
            StoredMessage::user("how many apps do we have?"),
            StoredMessage::assistant("49"),
            StoredMessage::user("what about iOS apps?"),
        ];
        let c = classify("what about iOS apps?", &history);
        assert_eq!(c.intent, Intent::SqlQuery);
    }

    #[test]
    fn follow_up_inherits_csv_export() {
        let history = vec![
            StoredMessage::user("export this as csv"),
            StoredMessage::assistant("CSV report generated."),
            StoredMessage::user("and same for android"),
        ];
        let c = classify("and same for android", &history);
        assert_eq!(c.intent, Intent::CsvExport);
        assert!(c.reasoning.contains("follow-up"));
    }

    #[test]
    fn long_message_is_not_follow_up() {
        let history = vec![
            StoredMessage::user("export this as csv"),
            StoredMessage::assistant("CSV report generated."),
        ];
        let c = classify(
            "and what about all of the android applications we ship",
            &history,
        );
        assert_eq!(c.intent, Intent::SqlQuery);
        assert!((c.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn follow_up_needs_assistant_turn() {
        let history = vec![StoredMessage::user("what about iOS?")];
        let c = classify("what about iOS?", &history);
        // No assistant turn yet: falls to the default.
        assert_eq!(c.intent, Intent::SqlQuery);
        assert!(!c.reasoning.contains("follow-up"));
    }

    #[test]
    fn android_does_not_trigger_and_marker() {
        let history = vec![
            StoredMessage::user("export this as csv"),
            StoredMessage::assistant("done"),
        ];
        // "android" contains "and" as a substring but not as a word.
        let c = classify("android installs?", &history);
        assert_eq!(c.intent, Intent::SqlQuery);
        assert!(!c.reasoning.contains("follow-up"));
    }

    #[test]
    fn total_function_over_arbitrary_strings() {
        for msg in ["", "???", "SELECT", "🚀🚀🚀", "a", &"x".repeat(5000)] {
            let c = classify(msg, &no_history());
            assert!((0.0..=1.0).contains(&c.confidence), "msg: {msg}");
            assert!(!c.reasoning.is_empty());
        }
    }
}
