//! Waterfall parser for tool calls embedded in free-form model text.
//!
//! Different models emit tool calls in incompatible textual conventions.
//! Instead of requiring the caller to know which one is active, the
//! [`ToolCallParser`] tries an explicit, priority-ordered list of
//! [`ToolCallRecognizer`]s and accepts the first structurally valid match.
//! Specific grammars run before loose ones so that ordinary prose containing
//! braces or parentheses does not misfire.
//!
//! # Recognizers (default priority order)
//!
//! | # | Recognizer | Format name | Example |
//! |---|------------|-------------|---------|
//! | 1 | [`TaggedEnvelope`] | `supercoder_tag` | `<@TOOL>{"name": "file-read", "arguments": {...}}</@TOOL>` |
//! | 2 | [`ChannelMarkup`] | `qwen_style` | `to=tool:read {"fileName": "a.py"}` |
//! | 3 | [`FencedJson`] | `json_block` | a fenced block holding `{"tool": "file-read", "args": {...}}` |
//! | 4 | [`XmlCall`] | `xml_function` | `<function_call name="file-read">{...}</function_call>` |
//! | 5 | [`CallSyntax`] | `pythonic` | `file-read(fileName="a.py")` |
//! | 6 | [`GenericJson`] | `generic_json` | `{"action": "code-edit", "params": {...}}` |
//!
//! Only the tagged envelope extracts several calls from one response; every
//! other recognizer contributes at most one call.
//!
//! Recognizers never fail. A delimiter with a malformed payload is the same
//! as no match, so the next recognizer (or the next occurrence) gets a
//! chance. A recognizer that panics is also treated as no match.

mod call_syntax;
mod channel;
mod fenced;
mod generic_json;
pub(crate) mod scan;
mod tagged;
mod xml;

pub use call_syntax::CallSyntax;
pub use channel::ChannelMarkup;
pub use fenced::FencedJson;
pub use generic_json::GenericJson;
pub use tagged::TaggedEnvelope;
pub use xml::XmlCall;

use serde_json::{Map, Value};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace, warn};

use crate::tools::names;

// ── ToolArguments ──────────────────────────────────────────────────

/// Arguments recovered for a tool call.
///
/// Models sometimes emit a JSON object and sometimes an opaque string (a
/// double-encoded JSON string, or prose inside an XML body). The registry
/// normalises either variant into the tool's own parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Raw(String),
    Structured(Map<String, Value>),
}

impl ToolArguments {
    pub fn empty() -> Self {
        ToolArguments::Structured(Map::new())
    }

    /// Objects become `Structured`, strings become `Raw`, `null` becomes
    /// empty, and any other JSON value is kept as its literal text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => ToolArguments::Structured(map),
            Value::String(s) => ToolArguments::Raw(s),
            Value::Null => ToolArguments::empty(),
            other => ToolArguments::Raw(other.to_string()),
        }
    }

    /// JSON-encoded form handed to the registry.
    pub fn to_json_string(&self) -> String {
        match self {
            ToolArguments::Raw(s) => s.clone(),
            ToolArguments::Structured(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    /// Look up a key of structured arguments.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            ToolArguments::Structured(map) => map.get(key),
            ToolArguments::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            ToolArguments::Raw(s) => Some(s),
            ToolArguments::Structured(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ToolArguments::Raw(s) => s.trim().is_empty(),
            ToolArguments::Structured(map) => map.is_empty(),
        }
    }
}

impl fmt::Display for ToolArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

// ── ToolCall ───────────────────────────────────────────────────────

/// A tool invocation recovered from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Tool name as emitted (alias-mapped by recognizers that need it).
    pub name: String,
    pub arguments: ToolArguments,
    /// The exact source text that matched.
    pub raw_match: String,
    /// Which recognizer produced this call.
    pub format_name: &'static str,
}

impl ToolCall {
    pub fn new(
        name: impl Into<String>,
        arguments: ToolArguments,
        raw_match: impl Into<String>,
        format_name: &'static str,
    ) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw_match: raw_match.into(),
            format_name,
        }
    }
}

// ── Recognizer trait ───────────────────────────────────────────────

/// One grammar in the waterfall.
pub trait ToolCallRecognizer: Send + Sync {
    /// Stable format name stamped onto produced calls.
    fn name(&self) -> &'static str;

    /// First call in `text`, if any.
    fn try_parse(&self, text: &str) -> Option<ToolCall>;

    /// All calls in `text`, left to right. Defaults to at most one.
    fn try_parse_all(&self, text: &str) -> Vec<ToolCall> {
        self.try_parse(text).into_iter().collect()
    }
}

// ── ToolCallParser ─────────────────────────────────────────────────

/// Priority-ordered chain of recognizers.
///
/// ```ignore
/// let parser = ToolCallParser::new();
/// let calls = parser.parse_all(&response_text);
/// for call in &calls {
///     println!("{} via {}", call.name, call.format_name);
/// }
/// ```
pub struct ToolCallParser {
    recognizers: Vec<Box<dyn ToolCallRecognizer>>,
}

impl ToolCallParser {
    /// Default chain, allow-listing the built-in tool names.
    pub fn new() -> Self {
        Self::with_known_tools(names::ALL.iter().copied())
    }

    /// Default chain whose loose recognizers accept only `known` names.
    pub fn with_known_tools<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let known: Vec<String> = known
            .into_iter()
            .map(|n| names::normalize(n.as_ref()))
            .collect();
        Self {
            recognizers: vec![
                Box::new(TaggedEnvelope),
                Box::new(ChannelMarkup),
                Box::new(FencedJson::new(known.clone())),
                Box::new(XmlCall),
                Box::new(CallSyntax::new(&known)),
                Box::new(GenericJson::new(known)),
            ],
        }
    }

    /// A chain with no recognizers, for assembling a custom order.
    pub fn empty() -> Self {
        Self {
            recognizers: Vec::new(),
        }
    }

    /// Append a recognizer at the lowest priority (builder pattern).
    pub fn with(mut self, recognizer: impl ToolCallRecognizer + 'static) -> Self {
        self.recognizers.push(Box::new(recognizer));
        self
    }

    /// Insert a recognizer at `priority` (0 = first). Out-of-range appends.
    pub fn add_recognizer(&mut self, recognizer: impl ToolCallRecognizer + 'static, priority: usize) {
        let idx = priority.min(self.recognizers.len());
        self.recognizers.insert(idx, Box::new(recognizer));
    }

    /// Format names in priority order.
    pub fn supported_formats(&self) -> Vec<&'static str> {
        self.recognizers.iter().map(|r| r.name()).collect()
    }

    /// First match across the chain.
    pub fn parse(&self, text: &str) -> Option<ToolCall> {
        for recognizer in &self.recognizers {
            let found = guarded(recognizer.as_ref(), || recognizer.try_parse(text)).flatten();
            if let Some(call) = found {
                debug!(
                    "Tool call parsed by {}: {}",
                    recognizer.name(),
                    call.name
                );
                return Some(call);
            }
            trace!("Recognizer {} found no match", recognizer.name());
        }
        None
    }

    /// Every call in `text`.
    ///
    /// The first recognizer that matches decides the result. For the tagged
    /// envelope that is every occurrence in source order; for the others it
    /// is a single call.
    pub fn parse_all(&self, text: &str) -> Vec<ToolCall> {
        for recognizer in &self.recognizers {
            let calls =
                guarded(recognizer.as_ref(), || recognizer.try_parse_all(text)).unwrap_or_default();
            if !calls.is_empty() {
                debug!(
                    "Found {} tool call(s) via {}",
                    calls.len(),
                    recognizer.name()
                );
                return calls;
            }
        }
        Vec::new()
    }
}

/// Run one recognizer, mapping a panic to `None`.
fn guarded<T>(recognizer: &dyn ToolCallRecognizer, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Recognizer {} panicked, skipping it", recognizer.name());
            None
        }
    }
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ToolCallParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallParser")
            .field("formats", &self.supported_formats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(value: Value) -> ToolArguments {
        ToolArguments::from_value(value)
    }

    #[test]
    fn supported_formats_in_priority_order() {
        let parser = ToolCallParser::new();
        assert_eq!(
            parser.supported_formats(),
            vec![
                "supercoder_tag",
                "qwen_style",
                "json_block",
                "xml_function",
                "pythonic",
                "generic_json"
            ]
        );
    }

    #[test]
    fn tagged_envelope_inside_prose() {
        let parser = ToolCallParser::new();
        let text = r#"I'll read the file first.
<@TOOL>{"name": "file-read", "arguments": {"fileName": "main.py"}}</@TOOL>
Then I will explain it."#;
        let call = parser.parse(text).unwrap();
        assert_eq!(call.name, "file-read");
        assert_eq!(call.arguments, structured(json!({"fileName": "main.py"})));
        assert_eq!(call.format_name, "supercoder_tag");
    }

    #[test]
    fn tagged_envelope_wins_over_looser_grammars() {
        let parser = ToolCallParser::new();
        let text = r#"```json
{"tool": "code-search", "args": {"query": "main"}}
```
<@TOOL>{"name": "file-read", "arguments": {"fileName": "a.py"}}</@TOOL>
file-read(fileName="b.py")"#;
        let call = parser.parse(text).unwrap();
        assert_eq!(call.format_name, "supercoder_tag");
        assert_eq!(call.name, "file-read");
        assert_eq!(call.arguments.get("fileName"), Some(&json!("a.py")));
    }

    #[test]
    fn parse_all_returns_tagged_calls_in_order() {
        let parser = ToolCallParser::new();
        let text = r#"<@TOOL>{"name": "file-read", "arguments": {"fileName": "a.py"}}</@TOOL>
and
<@TOOL>{"name": "file-read", "arguments": {"fileName": "b.py"}}</@TOOL>"#;
        let calls = parser.parse_all(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments.get("fileName"), Some(&json!("a.py")));
        assert_eq!(calls[1].arguments.get("fileName"), Some(&json!("b.py")));
    }

    #[test]
    fn parse_all_falls_back_to_single_call() {
        let parser = ToolCallParser::new();
        let calls = parser.parse_all(r#"to=tool:read {"fileName": "a.py"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "file-read");
        assert_eq!(calls[0].format_name, "qwen_style");
    }

    #[test]
    fn plain_prose_yields_nothing() {
        let parser = ToolCallParser::new();
        for text in [
            "",
            "Hello! How can I help you today?",
            "Use a map like {a: 1} or call print(x) when you need it.",
            r#"The config looks like {"debug": true, "level": 3}."#,
            "unknown_func(arg=\"value\")",
        ] {
            assert!(parser.parse(text).is_none(), "unexpected match in {text:?}");
            assert!(parser.parse_all(text).is_empty());
        }
    }

    #[test]
    fn malformed_envelope_falls_through() {
        let parser = ToolCallParser::new();
        let text = r#"<@TOOL>{"name": "file-read", "arguments": </@TOOL>
<function_call name="code-search">{"query": "fn main"}</function_call>"#;
        let call = parser.parse(text).unwrap();
        assert_eq!(call.format_name, "xml_function");
        assert_eq!(call.name, "code-search");
    }

    #[test]
    fn custom_recognizer_priority() {
        struct Always;
        impl ToolCallRecognizer for Always {
            fn name(&self) -> &'static str {
                "always"
            }
            fn try_parse(&self, text: &str) -> Option<ToolCall> {
                Some(ToolCall::new("noop", ToolArguments::empty(), text, "always"))
            }
        }

        let mut parser = ToolCallParser::new();
        parser.add_recognizer(Always, 0);
        assert_eq!(parser.supported_formats()[0], "always");
        assert_eq!(parser.parse("anything").unwrap().name, "noop");

        let appended = ToolCallParser::empty().with(Always);
        assert_eq!(appended.supported_formats(), vec!["always"]);
    }

    #[test]
    fn panicking_recognizer_is_skipped() {
        struct Broken;
        impl ToolCallRecognizer for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn try_parse(&self, text: &str) -> Option<ToolCall> {
                let end = text.len() + 10;
                let _ = &text.as_bytes()[..end];
                None
            }
        }

        let mut parser = ToolCallParser::new();
        parser.add_recognizer(Broken, 0);
        let text = r#"<@TOOL>{"name": "file-read", "arguments": {"fileName": "a.py"}}</@TOOL>
<@TOOL>{"name": "code-search", "arguments": {"query": "main"}}</@TOOL>"#;

        let calls = parser.parse_all(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].format_name, "supercoder_tag");
        assert_eq!(parser.parse(text).unwrap().name, "file-read");
        assert!(parser.parse("no calls here").is_none());
    }

    #[test]
    fn arguments_json_string_forms() {
        let args = structured(json!({"fileName": "a.py", "startLine": 3}));
        assert_eq!(args.to_json_string(), r#"{"fileName":"a.py","startLine":3}"#);

        let raw = ToolArguments::Raw("query text".into());
        assert_eq!(raw.to_json_string(), "query text");
        assert_eq!(raw.as_raw(), Some("query text"));
        assert!(ToolArguments::from_value(Value::Null).is_empty());
        assert_eq!(
            ToolArguments::from_value(json!(42)),
            ToolArguments::Raw("42".into())
        );
    }
}
