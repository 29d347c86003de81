//! Rolling conversation history under a token budget.
//!
//! [`ContextManager`] owns the message history. Every
//! [`add_message`](ContextManager::add_message) recomputes usage and, when
//! it crosses `max_tokens * compression_threshold`, runs the configured
//! [`CompressionStrategy`] before returning. The system prompt is accounted
//! separately and never evicted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::context::tokens::{HeuristicTokenizer, Tokenizer, message_tokens};
use crate::error::ConfigError;
use crate::{Message, is_tool_result};

/// Prefix of the synthetic user message that replaces history after compaction.
pub const SUMMARY_HEADER: &str = "[Previous Context Summary - remember this information]";

/// How history is shrunk once the threshold is crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// Drop the oldest messages.
    #[default]
    Sliding,
    /// Summarize older messages with a [`HistorySummarizer`]; behaves like
    /// `Sliding` when none is installed.
    Summarize,
    /// Keep the highest-scoring messages that fit, in chronological order.
    Smart,
}

impl fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionStrategy::Sliding => "sliding",
            CompressionStrategy::Summarize => "summarize",
            CompressionStrategy::Smart => "smart",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding" => Ok(Self::Sliding),
            "summarize" => Ok(Self::Summarize),
            "smart" => Ok(Self::Smart),
            other => Err(ConfigError::Invalid(format!(
                "unknown compression strategy '{other}' (expected sliding, summarize or smart)"
            ))),
        }
    }
}

/// Score weights for [`CompressionStrategy::Smart`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartWeights {
    /// Scaled by `index / len`, so the newest message scores highest.
    pub recency: f64,
    pub tool_result: f64,
    pub code: f64,
    pub error: f64,
}

impl Default for SmartWeights {
    fn default() -> Self {
        Self {
            recency: 50.0,
            tool_result: 30.0,
            code: 20.0,
            error: 25.0,
        }
    }
}

const CODE_MARKERS: &[&str] = &["```", "def ", "class ", "fn ", "function "];

impl SmartWeights {
    pub fn score(&self, index: usize, len: usize, message: &Message) -> f64 {
        let content = &message.content;
        let mut score = if len == 0 {
            0.0
        } else {
            index as f64 / len as f64 * self.recency
        };
        if is_tool_result(content) {
            score += self.tool_result;
        }
        if CODE_MARKERS.iter().any(|m| content.contains(m)) {
            score += self.code;
        }
        if content.to_lowercase().contains("error") {
            score += self.error;
        }
        score
    }
}

/// Budget and eviction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Total context window of the model, in tokens.
    pub max_tokens: usize,
    /// Tokens held back for the model's reply.
    pub reserved_for_response: usize,
    /// Fraction of `max_tokens` that triggers compression.
    pub compression_threshold: f64,
    /// Never evict below this many of the most recent messages.
    pub min_messages_to_keep: usize,
    pub strategy: CompressionStrategy,
    /// Fraction of `max_tokens` that compression aims for.
    pub compression_target: f64,
    pub smart_weights: SmartWeights,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 32_000,
            reserved_for_response: 4_096,
            compression_threshold: 0.7,
            min_messages_to_keep: 4,
            strategy: CompressionStrategy::Sliding,
            compression_target: 0.5,
            smart_weights: SmartWeights::default(),
        }
    }
}

fn valid_fraction(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

impl ContextConfig {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_reserved_for_response(mut self, reserved: usize) -> Self {
        self.reserved_for_response = reserved;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: f64) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn with_min_messages_to_keep(mut self, count: usize) -> Self {
        self.min_messages_to_keep = count;
        self
    }

    pub fn with_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_compression_target(mut self, target: f64) -> Self {
        self.compression_target = target;
        self
    }

    pub fn with_smart_weights(mut self, weights: SmartWeights) -> Self {
        self.smart_weights = weights;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        if self.reserved_for_response >= self.max_tokens {
            return Err(ConfigError::ReservedExceedsMax {
                reserved: self.reserved_for_response,
                max: self.max_tokens,
            });
        }
        if !valid_fraction(self.compression_threshold) {
            return Err(ConfigError::Threshold(self.compression_threshold));
        }
        if !valid_fraction(self.compression_target) {
            return Err(ConfigError::Target(self.compression_target));
        }
        Ok(())
    }

    /// Usage above this triggers compression.
    pub fn threshold_tokens(&self) -> f64 {
        self.max_tokens as f64 * self.compression_threshold
    }

    /// Usage compression tries to get under.
    pub fn target_tokens(&self) -> f64 {
        self.max_tokens as f64 * self.compression_target
    }
}

/// Point-in-time usage snapshot, recomputed on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextStats {
    pub total_tokens: usize,
    pub used_tokens: usize,
    /// Negative once usage overruns the response reserve.
    pub available_tokens: i64,
    pub message_count: usize,
    pub utilization_percent: f64,
}

fn grouped(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for ContextStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Context: {}/{} tokens ({:.1}%), {} messages",
            grouped(self.used_tokens),
            grouped(self.total_tokens),
            self.utilization_percent,
            self.message_count
        )
    }
}

/// What one compression pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionReport {
    pub strategy: CompressionStrategy,
    pub removed: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Synchronous summarizer for [`CompressionStrategy::Summarize`].
///
/// Returning `None` makes the manager fall back to sliding eviction.
pub trait HistorySummarizer: Send + Sync {
    fn summarize(&self, messages: &[Message]) -> Option<String>;
}

/// Owner of the conversation history.
pub struct ContextManager {
    config: ContextConfig,
    tokenizer: Box<dyn Tokenizer>,
    summarizer: Option<Box<dyn HistorySummarizer>>,
    system_prompt: String,
    system_tokens: usize,
    messages: Vec<Message>,
    compacted: bool,
}

impl fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("system_tokens", &self.system_tokens)
            .field("messages", &self.messages.len())
            .field("compacted", &self.compacted)
            .finish()
    }
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            tokenizer: Box::new(HeuristicTokenizer),
            summarizer: None,
            system_prompt: String::new(),
            system_tokens: 0,
            messages: Vec::new(),
            compacted: false,
        })
    }

    /// Replace the token estimator. The system prompt is re-counted.
    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Box::new(tokenizer);
        self.system_tokens = self.tokenizer.count(&self.system_prompt);
        self
    }

    pub fn with_summarizer(mut self, summarizer: impl HistorySummarizer + 'static) -> Self {
        self.summarizer = Some(Box::new(summarizer));
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
        self.system_tokens = self.tokenizer.count(&self.system_prompt);
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether history currently starts from an explicit compaction summary.
    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    pub fn set_compacted(&mut self, compacted: bool) {
        self.compacted = compacted;
    }

    /// Append a message, compressing if usage crosses the threshold.
    pub fn add_message(&mut self, message: Message) -> Option<CompressionReport> {
        self.messages.push(message);
        let used = self.used_tokens();
        if used as f64 > self.config.threshold_tokens() {
            debug!(
                "Context over threshold: {used} > {:.0} tokens, compressing",
                self.config.threshold_tokens()
            );
            Some(self.compress())
        } else {
            None
        }
    }

    /// Run the configured strategy now, regardless of the threshold.
    pub fn compress(&mut self) -> CompressionReport {
        let tokens_before = self.used_tokens();
        let count_before = self.messages.len();
        match self.config.strategy {
            CompressionStrategy::Sliding => self.sliding_compress(),
            CompressionStrategy::Summarize => self.summarize_compress(),
            CompressionStrategy::Smart => self.smart_compress(),
        }
        let report = CompressionReport {
            strategy: self.config.strategy,
            removed: count_before.saturating_sub(self.messages.len()),
            tokens_before,
            tokens_after: self.used_tokens(),
        };
        debug!(
            "Context compressed ({}): {} message(s) removed, {} -> {} tokens",
            report.strategy, report.removed, report.tokens_before, report.tokens_after
        );
        report
    }

    fn cost(&self, message: &Message) -> usize {
        message_tokens(self.tokenizer.as_ref(), message)
    }

    fn history_tokens(&self) -> usize {
        self.messages.iter().map(|m| self.cost(m)).sum()
    }

    fn used_tokens(&self) -> usize {
        self.system_tokens + self.history_tokens()
    }

    fn sliding_compress(&mut self) {
        let target = self.config.target_tokens();
        let min_keep = self.config.min_messages_to_keep;
        let mut used = self.used_tokens();
        let mut drop = 0;
        while self.messages.len() - drop > min_keep && used as f64 > target {
            used -= self.cost(&self.messages[drop]);
            drop += 1;
        }
        self.messages.drain(..drop);
    }

    fn summarize_compress(&mut self) {
        let min_keep = self.config.min_messages_to_keep;
        if self.messages.len() <= min_keep {
            return;
        }
        let split = self.messages.len() - min_keep;
        let summary = self
            .summarizer
            .as_ref()
            .and_then(|s| s.summarize(&self.messages[..split]))
            .filter(|s| !s.trim().is_empty());

        match summary {
            Some(summary) => {
                self.messages.drain(..split);
                self.messages
                    .insert(0, Message::user(format!("{SUMMARY_HEADER}\n\n{summary}")));
                if self.used_tokens() as f64 > self.config.target_tokens() {
                    self.sliding_compress();
                }
            }
            None => {
                if self.summarizer.is_some() {
                    warn!("History summarizer produced nothing, falling back to sliding window");
                }
                self.sliding_compress();
            }
        }
    }

    fn smart_compress(&mut self) {
        let len = self.messages.len();
        let min_keep = self.config.min_messages_to_keep;
        if len <= min_keep {
            return;
        }

        // The recent tail is kept unconditionally, so it is paid for first.
        let tail = len - min_keep;
        let target = self.config.target_tokens();
        let mut keep = vec![false; len];
        let mut current = self.system_tokens as f64;
        for (idx, flag) in keep.iter_mut().enumerate().skip(tail) {
            *flag = true;
            current += self.cost(&self.messages[idx]) as f64;
        }

        let weights = &self.config.smart_weights;
        let mut scored: Vec<(f64, usize)> = self.messages[..tail]
            .iter()
            .enumerate()
            .map(|(i, m)| (weights.score(i, len, m), i))
            .collect();
        // Stable: equal scores keep chronological order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, idx) in scored {
            let cost = self.cost(&self.messages[idx]) as f64;
            if current + cost <= target {
                keep[idx] = true;
                current += cost;
            }
        }

        let mut flags = keep.into_iter();
        self.messages.retain(|_| flags.next().unwrap_or(true));
    }

    pub fn get_stats(&self) -> ContextStats {
        let used = self.used_tokens();
        let effective = self
            .config
            .max_tokens
            .saturating_sub(self.config.reserved_for_response);
        let utilization_percent = if effective > 0 {
            used as f64 / effective as f64 * 100.0
        } else {
            100.0
        };
        ContextStats {
            total_tokens: self.config.max_tokens,
            used_tokens: used,
            available_tokens: effective as i64 - used as i64,
            message_count: self.messages.len(),
            utilization_percent,
        }
    }

    /// System prompt (when set) followed by the history.
    pub fn get_messages_for_api(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            out.push(Message::system(self.system_prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Replace the whole history with one summary message.
    pub fn set_initial_summary(&mut self, summary: &str) {
        self.messages = vec![Message::user(format!("{SUMMARY_HEADER}\n\n{summary}"))];
    }

    /// Install a history verbatim, e.g. from a saved session. No compression runs.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Drop the history. The system prompt stays.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.compacted = false;
    }

    pub fn set_max_tokens(&mut self, max_tokens: usize) -> Result<(), ConfigError> {
        let candidate = self.config.clone().with_max_tokens(max_tokens);
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    /// Whether a reply of `response_tokens` still fits in the window.
    pub fn estimate_response_fit(&self, response_tokens: usize) -> bool {
        self.get_stats().available_tokens >= response_tokens as i64
    }
}
