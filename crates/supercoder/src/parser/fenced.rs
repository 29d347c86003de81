//! Fenced code blocks holding a JSON tool descriptor.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::scan::parse_object;
use super::{ToolArguments, ToolCall, ToolCallRecognizer};
use crate::tools::names;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

/// Keys that may carry the tool identity, first found wins.
pub(crate) const IDENTITY_KEYS: &[&str] = &["tool", "function", "name", "tool_name"];
/// Keys that may carry the arguments, first found wins.
pub(crate) const ARGUMENT_KEYS: &[&str] = &["args", "arguments", "parameters", "params"];

/// ```json
/// {"tool": "file-read", "args": {"fileName": "main.py"}}
/// ```
///
/// The OpenAI-style nesting `{"function": {"name": ..., "arguments": ...}}`
/// is accepted too. A block without any argument key is only taken as a
/// call when its name refers to a known tool, so that a `package.json`
/// snippet does not look like one.
pub struct FencedJson {
    known: Vec<String>,
}

impl FencedJson {
    pub fn new(known: Vec<String>) -> Self {
        Self { known }
    }

    fn is_known(&self, name: &str) -> bool {
        let canonical = names::resolve_alias(name);
        self.known.iter().any(|k| *k == canonical)
    }

    fn from_object(&self, mut object: Map<String, Value>, raw: &str) -> Option<ToolCall> {
        let (name, nested_args) = IDENTITY_KEYS.iter().find_map(|&key| match object.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some((s.trim().to_string(), None)),
            Some(Value::Object(inner)) => match inner.get("name") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some((
                    s.trim().to_string(),
                    inner
                        .get("arguments")
                        .or_else(|| inner.get("parameters"))
                        .cloned(),
                )),
                _ => None,
            },
            _ => None,
        })?;

        let top_args = ARGUMENT_KEYS
            .iter()
            .find_map(|&key| object.remove(key));
        let args = nested_args.or(top_args);

        if args.is_none() && !self.is_known(&name) {
            return None;
        }

        let arguments = args
            .map(ToolArguments::from_value)
            .unwrap_or_else(ToolArguments::empty);
        Some(ToolCall::new(name, arguments, raw, "json_block"))
    }
}

impl ToolCallRecognizer for FencedJson {
    fn name(&self) -> &'static str {
        "json_block"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        if !text.contains("```") {
            return None;
        }
        FENCE.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?.as_str();
            let object = parse_object(caps.get(1)?.as_str())?;
            self.from_object(object, whole)
        })
    }
}
