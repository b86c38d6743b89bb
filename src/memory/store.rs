//! MemoryStore — thread-keyed conversation history and SQL query cache.
//!
//! Responsibilities:
//! - Ordered message history per thread, capped at `max_messages`
//! - Token-bounded compression of old user/assistant pairs into summaries
//! - A bounded ring of `QueryRecord`s per thread (FIFO eviction)
//! - Description-based lookup of previously executed SQL
//!
//! All operations are synchronous and infallible; the store is shared
//! process-wide behind a plain mutex. There are no await points inside any
//! operation, so holding the lock never spans a suspension.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;

use super::tokens::{estimate_message_tokens, head, SUMMARY_PREVIEW_CHARS};
use super::types::{MessageRole, QueryRecord, QueryResult, StoredMessage};
use crate::config::MemoryConfig;

// ─── ThreadState ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ThreadState {
    messages: Vec<StoredMessage>,
    queries: VecDeque<QueryRecord>,
}

// ─── MemoryStore ────────────────────────────────────────────────────────────

/// Per-thread conversation memory. Threads are created lazily on first use
/// and live for the process lifetime unless explicitly cleared.
pub struct MemoryStore {
    threads: Mutex<HashMap<String, ThreadState>>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            config,
        }
    }

    // ─── Message operations ─────────────────────────────────────────────

    /// Append a user message and re-apply the trim/compress pass.
    pub fn add_user_message(&self, thread_id: &str, content: impl Into<String>) {
        self.append(thread_id, StoredMessage::user(content));
    }

    /// Append an assistant message and re-apply the trim/compress pass.
    pub fn add_assistant_message(&self, thread_id: &str, content: impl Into<String>) {
        self.append(thread_id, StoredMessage::assistant(content));
    }

    /// All messages for a thread, oldest first. Empty for unknown threads.
    pub fn get_messages(&self, thread_id: &str) -> Vec<StoredMessage> {
        let threads = self.threads.lock().expect("memory store poisoned");
        threads
            .get(thread_id)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// Drop all state for a thread.
    pub fn clear_thread(&self, thread_id: &str) {
        let mut threads = self.threads.lock().expect("memory store poisoned");
        if threads.remove(thread_id).is_some() {
            tracing::debug!(thread_id, "cleared thread memory");
        }
    }

    /// Number of threads currently holding state.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().expect("memory store poisoned").len()
    }

    fn append(&self, thread_id: &str, message: StoredMessage) {
        let mut threads = self.threads.lock().expect("memory store poisoned");
        let state = threads.entry(thread_id.to_string()).or_default();
        state.messages.push(message);
        self.trim(thread_id, state);
    }

    // ─── Trim & compress ────────────────────────────────────────────────

    /// Invoked after every append: compress when the token estimate crosses
    /// the trigger ratio, then enforce the hard message cap from the front.
    fn trim(&self, thread_id: &str, state: &mut ThreadState) {
        let token_count = estimate_message_tokens(&state.messages);
        let trigger = (self.config.max_conversation_tokens as f64
            * self.config.compression_trigger_ratio) as usize;

        if token_count > trigger && state.messages.len() > self.config.keep_recent_messages {
            let before = state.messages.len();
            state.messages = compress(&state.messages, self.config.keep_recent_messages);
            tracing::info!(
                thread_id,
                tokens = token_count,
                messages_before = before,
                messages_after = state.messages.len(),
                "compressed conversation history"
            );
        }

        if state.messages.len() > self.config.max_messages_per_thread {
            let excess = state.messages.len() - self.config.max_messages_per_thread;
            state.messages.drain(..excess);
            tracing::debug!(thread_id, dropped = excess, "trimmed oldest messages");
        }
    }

    // ─── Query records ──────────────────────────────────────────────────

    /// Append a Query Record, evicting the oldest when the ring is full.
    pub fn store_sql_query(
        &self,
        thread_id: &str,
        sql: impl Into<String>,
        question: impl Into<String>,
        results: Option<QueryResult>,
    ) {
        let record = QueryRecord {
            sql: sql.into(),
            question: question.into(),
            results,
            timestamp: Utc::now(),
        };

        let mut threads = self.threads.lock().expect("memory store poisoned");
        let state = threads.entry(thread_id.to_string()).or_default();
        state.queries.push_back(record);
        while state.queries.len() > self.config.max_queries_per_thread {
            state.queries.pop_front();
        }
        tracing::debug!(
            thread_id,
            stored = state.queries.len(),
            "stored sql query record"
        );
    }

    /// All Query Records for a thread, oldest first.
    pub fn get_sql_queries(&self, thread_id: &str) -> Vec<QueryRecord> {
        let threads = self.threads.lock().expect("memory store poisoned");
        threads
            .get(thread_id)
            .map(|t| t.queries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent Query Record, if any.
    pub fn get_last_sql_query(&self, thread_id: &str) -> Option<QueryRecord> {
        let threads = self.threads.lock().expect("memory store poisoned");
        threads.get(thread_id).and_then(|t| t.queries.back().cloned())
    }

    /// Results of the most recent record whose execution succeeded.
    /// `None` when no successful results exist in the thread.
    pub fn get_last_query_results(&self, thread_id: &str) -> Option<QueryResult> {
        let threads = self.threads.lock().expect("memory store poisoned");
        threads.get(thread_id).and_then(|t| {
            t.queries
                .iter()
                .rev()
                .filter_map(|q| q.results.clone())
                .find(|r| r.success)
        })
    }

    /// Find a record whose original question matches `description`.
    ///
    /// Two passes, each newest-first: an exact case-insensitive substring
    /// match wins over the looser token-overlap match (any description word
    /// longer than 3 characters appearing in the question). With no
    /// description, the most recent record is returned.
    pub fn find_sql_by_description(
        &self,
        thread_id: &str,
        description: Option<&str>,
    ) -> Option<QueryRecord> {
        let queries = self.get_sql_queries(thread_id);
        if queries.is_empty() {
            return None;
        }

        if let Some(desc) = description.filter(|d| !d.trim().is_empty()) {
            let desc_lower = desc.to_lowercase();

            let substring_hit = queries
                .iter()
                .rev()
                .find(|r| r.question.to_lowercase().contains(&desc_lower));
            let token_hit = substring_hit.or_else(|| {
                queries.iter().rev().find(|r| {
                    let question = r.question.to_lowercase();
                    desc_lower
                        .split_whitespace()
                        .filter(|w| w.len() > 3)
                        .any(|w| question.contains(w))
                })
            });

            if let Some(record) = token_hit {
                tracing::info!(
                    thread_id,
                    question = %record.question,
                    description = desc,
                    "matched stored query by description"
                );
                return Some(record.clone());
            }
        }

        queries.last().cloned()
    }
}

// ─── Compression ────────────────────────────────────────────────────────────

/// Replace all but the last `keep_recent` messages with pairwise summaries.
///
/// Old messages are walked in pairs; each `(user, assistant)` pair becomes a
/// single fixed-shape summary turn
/// `"User asked: {first 100 chars}... Response: {first 100 chars}..."` — the
/// trailing `...` is part of the shape, not a truncation marker. An unpaired
/// trailing item gets the single-sided form. Earlier summaries in the old
/// window re-compress the same way, so repeated passes keep halving the
/// prefix instead of letting it grow. The 100-character cut is deliberate
/// and sentence-unaware.
fn compress(messages: &[StoredMessage], keep_recent: usize) -> Vec<StoredMessage> {
    if messages.len() <= keep_recent {
        return messages.to_vec();
    }

    let split = messages.len() - keep_recent;
    let (old, recent) = messages.split_at(split);

    let mut compressed = Vec::with_capacity(old.len() / 2 + keep_recent + 1);
    for chunk in old.chunks(2) {
        let summary = match chunk {
            [first, second] => {
                format!("{} {}", summarize_side(first), summarize_side(second))
            }
            [single] => summarize_side(single),
            _ => continue,
        };
        compressed.push(StoredMessage::summary(summary));
    }

    compressed.extend_from_slice(recent);
    compressed
}

/// One side of a summary pair: role label, first 100 characters, and the
/// unconditional `...`. Existing summaries are already labeled prose, so
/// they keep only the cut and the `...`.
fn summarize_side(message: &StoredMessage) -> String {
    let text = head(&message.content, SUMMARY_PREVIEW_CHARS);
    match message.role {
        MessageRole::User => format!("User asked: {text}..."),
        MessageRole::Assistant => format!("Response: {text}..."),
        MessageRole::Summary => format!("{text}..."),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
