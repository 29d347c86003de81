//! Terminal rendering of agent events.
//!
//! Streamed text passes through a [`DisplayFilter`] that hides tool-call
//! and tool-result blocks as they arrive. Output uses `\r\n` line endings
//! because the keyboard listener keeps the terminal in raw mode during a
//! turn.

use crossterm::style::{Color, Stylize, style};
use std::io::{self, Write};
use std::sync::Mutex;

use supercoder::agent::{AgentEvent, EventHandler};

/// Characters of a tool call or result shown before truncating.
pub const PREVIEW_CHARS: usize = 500;

/// Opening and closing markers of blocks never shown to the user.
const HIDDEN_BLOCKS: &[(&str, &str)] = &[
    ("<@TOOL_RESULT>", "</@TOOL_RESULT>"),
    ("<@TOOL>", "</@TOOL>"),
    ("<|start|>", "<|call|>"),
    ("<|channel|>", "<|call|>"),
    ("<function_call", "</function_call>"),
    ("<tool ", "</tool>"),
    ("```tool_code", "```"),
];

/// Longest suffix of `text` that is a proper prefix of `pattern`.
fn partial_suffix_len(text: &str, pattern: &str) -> usize {
    let max = pattern.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| pattern.get(..k).is_some_and(|prefix| text.ends_with(prefix)))
        .unwrap_or(0)
}

/// Incremental filter over streamed text.
///
/// Text that might be the start of a hidden block is held back until the
/// block is confirmed or ruled out. A block is hidden only once its closing
/// marker arrives.
#[derive(Debug, Default)]
pub struct DisplayFilter {
    pending: String,
    /// Markers of the block being held, opener already consumed.
    open_block: Option<(&'static str, &'static str)>,
}

impl DisplayFilter {
    /// Feed a delta; returns the text now safe to display.
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut out = String::new();
        loop {
            if let Some((_, close)) = self.open_block {
                let Some(at) = self.pending.find(close) else {
                    return out;
                };
                self.pending = self.pending.split_off(at + close.len());
                self.open_block = None;
                continue;
            }

            let earliest = HIDDEN_BLOCKS
                .iter()
                .filter_map(|&(open, close)| self.pending.find(open).map(|at| (at, open, close)))
                .min_by_key(|&(at, ..)| at);
            match earliest {
                Some((at, open, close)) => {
                    let rest = self.pending.split_off(at);
                    out.push_str(&self.pending);
                    self.pending = rest;
                    self.pending = self.pending.split_off(open.len());
                    self.open_block = Some((open, close));
                }
                None => {
                    let keep = HIDDEN_BLOCKS
                        .iter()
                        .map(|&(open, _)| partial_suffix_len(&self.pending, open))
                        .max()
                        .unwrap_or(0);
                    let held = self.pending.split_off(self.pending.len() - keep);
                    out.push_str(&self.pending);
                    self.pending = held;
                    return out;
                }
            }
        }
    }

    /// End of response: release held text. A block that never closed is
    /// not a tool call, so it is shown as written.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        match self.open_block.take() {
            Some((open, _)) => format!("{open}{rest}"),
            None => rest,
        }
    }
}

/// Char-safe preview with a trailing `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

struct PrinterState<W> {
    out: W,
    filter: DisplayFilter,
    at_line_start: bool,
}

/// [`EventHandler`] that draws a turn on a terminal.
pub struct TerminalPrinter<W: Write + Send = io::Stdout> {
    state: Mutex<PrinterState<W>>,
    color: bool,
    show_reasoning: bool,
}

impl TerminalPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout()).with_color(true)
    }
}

impl<W: Write + Send> TerminalPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(PrinterState {
                out,
                filter: DisplayFilter::default(),
                at_line_start: true,
            }),
            color: false,
            show_reasoning: false,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_reasoning(mut self, show: bool) -> Self {
        self.show_reasoning = show;
        self
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().unwrap_or_else(|e| e.into_inner()).out
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            style(text).with(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// Write `text` with raw-mode line endings.
    fn emit(state: &mut PrinterState<W>, text: &str) {
        if text.is_empty() {
            return;
        }
        let raw = text.replace("\r\n", "\n").replace('\n', "\r\n");
        let _ = state.out.write_all(raw.as_bytes());
        let _ = state.out.flush();
        state.at_line_start = text.ends_with('\n');
    }

    /// Write a full line, breaking off any partial streamed line first.
    fn line(&self, text: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.at_line_start {
            Self::emit(&mut state, "\n");
        }
        Self::emit(&mut state, &format!("{text}\n"));
    }

    fn stream(&self, delta: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let visible = state.filter.push(delta);
        Self::emit(&mut state, &visible);
    }

    fn finish_response(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let rest = state.filter.finish();
        Self::emit(&mut state, &rest);
        if !state.at_line_start {
            Self::emit(&mut state, "\n");
        }
    }
}

impl<W: Write + Send> EventHandler for TerminalPrinter<W> {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::IterationStart { .. } => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.filter = DisplayFilter::default();
            }
            AgentEvent::TextDelta(text) => self.stream(text),
            AgentEvent::ReasoningDelta(text) => {
                if self.show_reasoning {
                    let dim = self.paint(text, Color::DarkGrey);
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    Self::emit(&mut state, &dim);
                }
            }
            AgentEvent::ResponseComplete(_) => self.finish_response(),
            AgentEvent::ToolCallsParsed { .. } | AgentEvent::Finished => {}
            AgentEvent::ToolExecuting { name, arguments, .. } => {
                self.line(&self.paint(&format!("🔧 Tool Call: {name}"), Color::Yellow));
                if !arguments.trim().is_empty() {
                    self.line(&self.paint(&preview(arguments, PREVIEW_CHARS), Color::DarkGrey));
                }
            }
            AgentEvent::ToolResult {
                name,
                result,
                is_error,
            } => {
                let (title, color) = if *is_error {
                    (format!("✘ Failed: {name}"), Color::Red)
                } else {
                    (format!("✔ Result: {name}"), Color::Green)
                };
                self.line(&self.paint(&title, color));
                self.line(&self.paint(&preview(result.trim_end(), PREVIEW_CHARS), Color::DarkGrey));
            }
            AgentEvent::ContextCompressed(report) => {
                self.line(&self.paint(
                    &format!(
                        "[context compressed ({}): {} messages removed, {} -> {} tokens]",
                        report.strategy, report.removed, report.tokens_before, report.tokens_after
                    ),
                    Color::DarkGrey,
                ));
            }
            AgentEvent::Error(message) => {
                self.line(&self.paint(&format!("Error: {message}"), Color::Red));
            }
            AgentEvent::Aborted => {
                self.line(&self.paint("[Interrupted]", Color::Yellow));
            }
            AgentEvent::MaxIterationsReached { max_iterations } => {
                self.line(&self.paint(
                    &format!(
                        "Stopped after {max_iterations} iterations. Send a follow-up message to continue."
                    ),
                    Color::Yellow,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supercoder::context::{CompressionReport, CompressionStrategy};

    fn filtered(chunks: &[&str]) -> String {
        let mut filter = DisplayFilter::default();
        let mut out: String = chunks.iter().map(|c| filter.push(c)).collect();
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn plain_text_streams_through() {
        let mut filter = DisplayFilter::default();
        assert_eq!(filter.push("Hello, "), "Hello, ");
        assert_eq!(filter.push("world."), "world.");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn hides_tool_call_split_across_chunks() {
        let out = filtered(&[
            "Let me check.\n<@TO",
            r#"OL>{"name": "file-read", "arguments": {"fileName": "a.rs"}}</@T"#,
            "OOL>\nDone.",
        ]);
        assert_eq!(out, "Let me check.\n\nDone.");
    }

    #[test]
    fn holds_possible_opener_until_ruled_out() {
        let mut filter = DisplayFilter::default();
        assert_eq!(filter.push("a <"), "a ");
        assert_eq!(filter.push("b> c"), "<b> c");
    }

    #[test]
    fn hides_other_call_syntaxes() {
        let out = filtered(&[
            "One ",
            "<|start|>assistant<|channel|>commentary to=functions.file-read<|message|>{}<|call|>",
            " two ",
            "<function_call name=\"code-search\">{\"query\": \"x\"}</function_call>",
            " three",
        ]);
        assert_eq!(out, "One  two  three");
    }

    #[test]
    fn unterminated_block_is_shown_at_finish() {
        assert_eq!(
            filtered(&["Answer <@TOOL>{\"name\": \"file-"]),
            "Answer <@TOOL>{\"name\": \"file-"
        );

        let mut filter = DisplayFilter::default();
        assert_eq!(filter.push("Wrap it in a <tool "), "Wrap it in a ");
        assert_eq!(filter.push("element and you are done."), "");
        assert_eq!(filter.finish(), "<tool element and you are done.");
    }

    #[test]
    fn multibyte_text_is_safe() {
        assert_eq!(filtered(&["héllo ", "wörld <", "✓"]), "héllo wörld <✓");
    }

    #[test]
    fn preview_truncates_by_chars() {
        assert_eq!(preview("abc", 5), "abc");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn renders_turn_events() {
        let printer = TerminalPrinter::new(Vec::new());
        let stats = supercoder::context::ContextStats {
            total_tokens: 1000,
            used_tokens: 10,
            available_tokens: 790,
            message_count: 1,
            utilization_percent: 1.0,
        };
        printer.on_event(&AgentEvent::IterationStart {
            iteration: 1,
            max_iterations: 25,
            stats: &stats,
        });
        printer.on_event(&AgentEvent::TextDelta("Reading.\n<@TOOL>{}</@TOOL>"));
        printer.on_event(&AgentEvent::ResponseComplete("Reading.\n<@TOOL>{}</@TOOL>"));
        printer.on_event(&AgentEvent::ToolExecuting {
            name: "file-read",
            arguments: r#"{"fileName": "a.rs"}"#,
            format: "supercoder_tag",
        });
        let long = "x".repeat(PREVIEW_CHARS + 20);
        printer.on_event(&AgentEvent::ToolResult {
            name: "file-read",
            result: &long,
            is_error: false,
        });
        let report = CompressionReport {
            strategy: CompressionStrategy::Sliding,
            removed: 3,
            tokens_before: 900,
            tokens_after: 400,
        };
        printer.on_event(&AgentEvent::ContextCompressed(&report));
        printer.on_event(&AgentEvent::Error("Unknown tool: frobnicate"));
        printer.on_event(&AgentEvent::Aborted);
        printer.on_event(&AgentEvent::MaxIterationsReached { max_iterations: 25 });

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert!(out.starts_with("Reading.\r\n"));
        assert!(!out.contains("<@TOOL>"));
        assert!(out.contains("🔧 Tool Call: file-read"));
        assert!(out.contains("a.rs"));
        assert!(out.contains("✔ Result: file-read"));
        assert!(out.contains(&format!("{}...", "x".repeat(PREVIEW_CHARS))));
        assert!(!out.contains(&"x".repeat(PREVIEW_CHARS + 1)));
        assert!(out.contains("3 messages removed, 900 -> 400 tokens"));
        assert!(out.contains("Error: Unknown tool: frobnicate"));
        assert!(out.contains("[Interrupted]"));
        assert!(out.contains("Stopped after 25 iterations"));
        assert!(!out.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn reasoning_hidden_by_default() {
        let printer = TerminalPrinter::new(Vec::new());
        printer.on_event(&AgentEvent::ReasoningDelta("thinking"));
        assert!(printer.into_inner().is_empty());

        let printer = TerminalPrinter::new(Vec::new()).with_reasoning(true);
        printer.on_event(&AgentEvent::ReasoningDelta("thinking"));
        assert_eq!(printer.into_inner(), b"thinking");
    }
}
