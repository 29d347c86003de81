//! Approximate token accounting.
//!
//! Counts are estimates. Budget thresholds built on them are soft limits:
//! a real tokenizer can disagree by a sizable margin, especially on code.

use crate::Message;

/// Fixed per-message cost approximating role and formatting overhead.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Pluggable token counter.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `max(words, chars / 4)`: whichever of the two estimates is larger.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    let chars = text.chars().count() / 4;
    words.max(chars)
}

/// Cost of one message, including [`MESSAGE_OVERHEAD`].
pub fn message_tokens(tokenizer: &dyn Tokenizer, message: &Message) -> usize {
    MESSAGE_OVERHEAD + tokenizer.count(&message.content)
}

pub fn count_messages(tokenizer: &dyn Tokenizer, messages: &[Message]) -> usize {
    messages.iter().map(|m| message_tokens(tokenizer, m)).sum()
}
