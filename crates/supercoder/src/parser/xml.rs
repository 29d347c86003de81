//! XML-like function call tags.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::scan::decode_entities;
use super::{ToolArguments, ToolCall, ToolCallRecognizer};

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<function_call\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)</function_call>"#)
        .expect("valid regex")
});

static SELF_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<function_call\s+name\s*=\s*["']([^"']+)["']\s+args\s*=\s*(?:'([^']*)'|"([^"]*)")\s*/>"#,
    )
    .expect("valid regex")
});

static TOOL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)</tool>"#).expect("valid regex")
});

/// Accepts three sibling conventions:
///
/// - `<function_call name="file-read">{"fileName": "a.py"}</function_call>`
/// - `<function_call name="file-read" args='{"fileName": "a.py"}'/>`
/// - `<tool name="code-search">query text</tool>`
///
/// When several appear, the earliest in the text wins. A body that is not
/// JSON is kept as a raw string argument.
pub struct XmlCall;

fn parse_body(body: &str) -> ToolArguments {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return ToolArguments::empty();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => ToolArguments::from_value(value),
        Err(_) => ToolArguments::Raw(trimmed.to_string()),
    }
}

impl ToolCallRecognizer for XmlCall {
    fn name(&self) -> &'static str {
        "xml_function"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        if !text.contains("<function_call") && !text.contains("<tool") {
            return None;
        }

        let mut candidates: Vec<(usize, ToolCall)> = Vec::new();

        if let Some(caps) = FUNCTION_CALL.captures(text) {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            let body = caps.get(2).map_or("", |m| m.as_str());
            candidates.push((
                whole.start(),
                ToolCall::new(name, parse_body(body), whole.as_str(), "xml_function"),
            ));
        }

        if let Some(caps) = SELF_CLOSING.captures(text) {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            let attr = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            candidates.push((
                whole.start(),
                ToolCall::new(
                    name,
                    parse_body(&decode_entities(attr)),
                    whole.as_str(),
                    "xml_function",
                ),
            ));
        }

        if let Some(caps) = TOOL_TAG.captures(text) {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            let body = caps.get(2).map_or("", |m| m.as_str());
            candidates.push((
                whole.start(),
                ToolCall::new(name, parse_body(body), whole.as_str(), "xml_function"),
            ));
        }

        candidates
            .into_iter()
            .min_by_key(|(start, _)| *start)
            .map(|(_, call)| call)
    }
}
