//! Last-resort scan for any JSON object that names a known tool.

use serde_json::{Map, Value};

use super::fenced::ARGUMENT_KEYS;
use super::scan::{object_spans, parse_object};
use super::{ToolArguments, ToolCall, ToolCallRecognizer};
use crate::tools::names;

const IDENTITY_KEYS: &[&str] = &["tool", "function", "name", "tool_name", "action"];

/// Accepts `{"action": "code_edit", "params": {...}}` or
/// `{"tool": "file_read", "path": "main.py"}` anywhere in the text.
///
/// The identity value must resolve to an allow-listed tool; incidental JSON
/// such as `{"name": "Alice"}` is ignored. Without an explicit argument key
/// the remaining keys become the arguments.
pub struct GenericJson {
    known: Vec<String>,
}

impl GenericJson {
    pub fn new(known: Vec<String>) -> Self {
        Self { known }
    }

    fn identity(&self, object: &Map<String, Value>) -> Option<(&'static str, String)> {
        IDENTITY_KEYS.iter().find_map(|&key| {
            let value = object.get(key)?.as_str()?.trim();
            let canonical = names::resolve_alias(value);
            self.known
                .iter()
                .any(|k| *k == canonical)
                .then(|| (key, value.to_string()))
        })
    }

    fn from_object(&self, mut object: Map<String, Value>, raw: &str) -> Option<ToolCall> {
        let (key, name) = self.identity(&object)?;
        object.remove(key);

        let arguments = match ARGUMENT_KEYS.iter().find_map(|&k| object.remove(k)) {
            Some(value) => ToolArguments::from_value(value),
            None => ToolArguments::Structured(object),
        };
        Some(ToolCall::new(name, arguments, raw, "generic_json"))
    }
}

impl ToolCallRecognizer for GenericJson {
    fn name(&self) -> &'static str {
        "generic_json"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        if !text.contains('{') {
            return None;
        }
        object_spans(text).into_iter().find_map(|(start, end)| {
            let raw = text.get(start..end)?;
            let object = parse_object(raw)?;
            self.from_object(object, raw)
        })
    }
}
