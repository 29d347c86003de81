//! Context window management: token accounting, automatic compression and
//! explicit compaction.
//!
//! 1. **[`tokens`]**: approximate per-message cost behind a pluggable
//!    [`Tokenizer`]. Estimates only; thresholds are soft.
//!
//! 2. **[`window`]**: [`ContextManager`] owns the history and runs one of
//!    three strategies when usage crosses the threshold:
//!    - **sliding**: drop the oldest messages down to the target.
//!    - **summarize**: replace older messages with a summary from a
//!      [`HistorySummarizer`], or slide when none is installed.
//!    - **smart**: keep the highest-scoring messages (recency, tool results,
//!      code, errors) that fit, plus the most recent few, in original order.
//!
//! 3. **[`compaction`]**: caller-triggered summarization of the entire
//!    history through the model, replacing it with one summary message.

pub mod compaction;
pub mod tokens;
pub mod window;

pub use compaction::{CONTEXT_SUMMARY_PROMPT, CompactionOutcome, compact};
pub use tokens::{HeuristicTokenizer, MESSAGE_OVERHEAD, Tokenizer, estimate_tokens};
pub use window::{
    CompressionReport, CompressionStrategy, ContextConfig, ContextManager, ContextStats,
    HistorySummarizer, SUMMARY_HEADER, SmartWeights,
};
