//! Token estimation for conversation-window management.
//!
//! Uses the rough chat-model heuristic of ~4 characters per token. The
//! estimate only has to be stable and monotonic: it gates compression, it
//! does not bill anyone.

use super::types::StoredMessage;

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Maximum characters of a turn quoted into a compression summary.
pub(crate) const SUMMARY_PREVIEW_CHARS: usize = 100;

/// Estimate the token count of a text fragment.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Estimate the total token count of a message sequence.
pub fn estimate_message_tokens(messages: &[StoredMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
/// Shorter text comes back whole.
pub(crate) fn head(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
