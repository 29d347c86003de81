//! Events emitted by the turn loop, and the handlers that observe them.
//!
//! The [`Agent`](super::Agent) reports every observable step of a turn
//! through [`AgentEvent`] so that front ends can render streamed text and
//! tool activity live while the loop keeps ownership of the history.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Terminal rendering, metrics |

use crate::context::{CompressionReport, ContextStats};
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during [`Agent::run_turn`](super::Agent::run_turn).
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A model call is about to be made.
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        stats: &'a ContextStats,
    },
    /// Visible text delta from the stream.
    TextDelta(&'a str),
    /// Reasoning delta from the stream.
    ReasoningDelta(&'a str),
    /// The full response text after the stream ended, as committed.
    ResponseComplete(&'a str),
    /// Tool calls were extracted from the response.
    ToolCallsParsed { iteration: u32, count: usize },
    /// A tool is about to run.
    ToolExecuting {
        name: &'a str,
        arguments: &'a str,
        format: &'static str,
    },
    /// A tool finished (successfully or not).
    ToolResult {
        name: &'a str,
        result: &'a str,
        is_error: bool,
    },
    /// Automatic compression ran after a message was added.
    ContextCompressed(&'a CompressionReport),
    /// A recoverable per-call error or a terminal transport error.
    Error(&'a str),
    /// The abort signal was observed. Emitted at most once per turn.
    Aborted,
    /// The iteration cap was hit with tool calls still pending.
    MaxIterationsReached { max_iterations: u32 },
    /// The model answered without tool calls.
    Finished,
}

impl AgentEvent<'_> {
    /// Short stable name, for logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IterationStart { .. } => "iteration_start",
            Self::TextDelta(_) => "text_delta",
            Self::ReasoningDelta(_) => "reasoning_delta",
            Self::ResponseComplete(_) => "response_complete",
            Self::ToolCallsParsed { .. } => "tool_calls_parsed",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::ContextCompressed(_) => "context_compressed",
            Self::Error(_) => "error",
            Self::Aborted => "aborted",
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
            Self::Finished => "finished",
        }
    }
}

// ── EventHandler trait ─────────────────────────────────────────────

/// Observer of [`AgentEvent`]s.
///
/// Implementations must be cheap: events are delivered synchronously on the
/// turn loop, between stream chunks.
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &AgentEvent<'_>) {
///         if let AgentEvent::TextDelta(text) = event {
///             print!("{text}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>);
}

/// Handler that ignores every event.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &AgentEvent<'_>) {}
}

/// Closure-based handler.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event: &AgentEvent<'_>| {
///     if let AgentEvent::ToolExecuting { name, .. } = event {
///         eprintln!("running {name}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches each event to every inner handler, in insertion order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(interactive, TerminalPrinter::new());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

// ── LoggingHandler ─────────────────────────────────────────────────

fn preview(text: &str, max: usize) -> String {
    let head: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{head}...")
    } else {
        head
    }
}

/// Mirrors events into `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
                stats,
            } => {
                info!("[iteration {iteration}/{max_iterations}] {stats}");
            }
            AgentEvent::TextDelta(text) => trace!("delta: {} chars", text.len()),
            AgentEvent::ReasoningDelta(text) => trace!("reasoning delta: {} chars", text.len()),
            AgentEvent::ResponseComplete(text) => {
                debug!("LLM text: {}", preview(text, 200));
            }
            AgentEvent::ToolCallsParsed { iteration, count } => {
                debug!("{count} tool call(s) in iteration {iteration}");
            }
            AgentEvent::ToolExecuting { name, format, .. } => {
                debug!("Executing tool: {name} (format={format})");
            }
            AgentEvent::ToolResult {
                name,
                result,
                is_error,
            } => {
                if *is_error {
                    warn!("Tool {name} failed: {}", preview(result, 200));
                } else {
                    debug!("Tool {name} result: {} bytes", result.len());
                }
            }
            AgentEvent::ContextCompressed(report) => {
                info!(
                    "Context compressed ({}): removed {} message(s), {} -> {} tokens",
                    report.strategy, report.removed, report.tokens_before, report.tokens_after
                );
            }
            AgentEvent::Error(message) => warn!("Turn error: {message}"),
            AgentEvent::Aborted => info!("Turn aborted"),
            AgentEvent::MaxIterationsReached { max_iterations } => {
                warn!("Reached max iterations ({max_iterations})");
            }
            AgentEvent::Finished => info!("Agent finished (no more tool calls)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl EventHandler + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnEventHandler::new(move |e: &AgentEvent<'_>| {
            sink.lock().unwrap().push(e.kind());
        });
        (seen, handler)
    }

    #[test]
    fn composite_dispatches_in_order() {
        let (a, first) = recorder();
        let (b, second) = recorder();
        let composite = CompositeEventHandler::new()
            .with(first)
            .with(second)
            .with(LoggingHandler);
        assert_eq!(composite.len(), 3);

        composite.on_event(&AgentEvent::TextDelta("hi"));
        composite.on_event(&AgentEvent::Finished);

        assert_eq!(*a.lock().unwrap(), vec!["text_delta", "finished"]);
        assert_eq!(*b.lock().unwrap(), vec!["text_delta", "finished"]);
    }

    #[test]
    fn conditional_builders() {
        let composite = CompositeEventHandler::new()
            .with_if(false, NoopHandler)
            .with_opt(None::<NoopHandler>)
            .with_opt(Some(NoopHandler));
        assert_eq!(composite.len(), 1);
        assert!(CompositeEventHandler::default().is_empty());
    }

    #[test]
    fn preview_is_char_safe() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("ok", 5), "ok");
    }
}
