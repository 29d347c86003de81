//! Native `<@TOOL>{...}</@TOOL>` envelope.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::scan::{parse_object, strip_code_fence};
use super::{ToolArguments, ToolCall, ToolCallRecognizer};

static ENVELOPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<@TOOL>(.*?)</@TOOL>").expect("valid regex"));

/// The instructed format, and the only recognizer that yields several calls
/// per response.
///
/// The payload must be a JSON object with a string `name`. `arguments` may
/// be an object, a (double-encoded) string, or absent. Models occasionally
/// wrap either the whole envelope or just the payload in a code fence; both
/// are tolerated.
pub struct TaggedEnvelope;

impl TaggedEnvelope {
    fn parse_payload(payload: &str, raw: &str) -> Option<ToolCall> {
        let mut object = parse_object(strip_code_fence(payload))?;
        let name = match object.get("name") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };
        let arguments = object
            .remove("arguments")
            .map(ToolArguments::from_value)
            .unwrap_or_else(ToolArguments::empty);
        Some(ToolCall::new(name, arguments, raw, "supercoder_tag"))
    }
}

impl ToolCallRecognizer for TaggedEnvelope {
    fn name(&self) -> &'static str {
        "supercoder_tag"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        self.try_parse_all(text).into_iter().next()
    }

    fn try_parse_all(&self, text: &str) -> Vec<ToolCall> {
        if !text.contains("<@TOOL>") {
            return Vec::new();
        }
        ENVELOPE
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?.as_str();
                let payload = caps.get(1)?.as_str();
                Self::parse_payload(payload, whole)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_basic_envelope() {
        let call = TaggedEnvelope
            .try_parse(r#"<@TOOL>{"name": "file-read", "arguments": {"fileName": "main.py"}}</@TOOL>"#)
            .unwrap();
        assert_eq!(call.name, "file-read");
        assert_eq!(call.arguments.get("fileName"), Some(&json!("main.py")));
        assert!(call.raw_match.starts_with("<@TOOL>"));
    }

    #[test]
    fn missing_arguments_are_empty() {
        let call = TaggedEnvelope
            .try_parse(r#"<@TOOL>{"name": "project-structure"}</@TOOL>"#)
            .unwrap();
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn string_arguments_stay_raw() {
        let call = TaggedEnvelope
            .try_parse(r#"<@TOOL>{"name": "file-read", "arguments": "{\"fileName\": \"a.py\"}"}</@TOOL>"#)
            .unwrap();
        assert_eq!(
            call.arguments,
            ToolArguments::Raw(r#"{"fileName": "a.py"}"#.into())
        );
    }

    #[test]
    fn tolerates_code_fences() {
        let outer = "```\n<@TOOL>{\"name\": \"file-read\", \"arguments\": {}}</@TOOL>\n```";
        assert!(TaggedEnvelope.try_parse(outer).is_some());

        let inner = "<@TOOL>\n```json\n{\"name\": \"file-read\", \"arguments\": {}}\n```\n</@TOOL>";
        assert_eq!(TaggedEnvelope.try_parse(inner).unwrap().name, "file-read");
    }

    #[test]
    fn malformed_occurrence_is_skipped() {
        let text = r#"<@TOOL>{"name": broken}</@TOOL>
<@TOOL>{"name": "code-search", "arguments": {"query": "x"}}</@TOOL>
<@TOOL>{"arguments": {}}</@TOOL>"#;
        let calls = TaggedEnvelope.try_parse_all(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "code-search");
    }

    #[test]
    fn unterminated_envelope_is_ignored() {
        assert!(
            TaggedEnvelope
                .try_parse(r#"<@TOOL>{"name": "file-read", "arguments": {}}"#)
                .is_none()
        );
    }
}
