//! Channel-style pseudo-markup (`<|channel|>... to=tool:name <|message|>{...}`).
//!
//! Emitted by a family of open models in three flavours of decreasing
//! strictness:
//!
//! 1. `<|start|>assistant<|channel|>commentary to=tool:read <|message|>{...}<|call|>`
//! 2. the same without `<|start|>` or the closing `<|call|>`
//! 3. terse `to=tool:read {...}`
//!
//! These models abbreviate tool names, so every name is passed through
//! [`names::resolve_alias`].

use regex::Regex;
use std::sync::LazyLock;

use super::scan::{balanced_object_end, parse_object};
use super::{ToolArguments, ToolCall, ToolCallRecognizer};
use crate::tools::names;

const CALL_MARKER: &str = "<|call|>";

static FULL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<\|start\|>.*?to=(?:(?:tool|functions)[:\s.])?([a-z0-9_-]+).*?<\|message\|>",
    )
    .expect("valid regex")
});

static CHANNEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<\|channel\|>.*?to=(?:(?:tool|functions)[:\s.])?([a-z0-9_-]+).*?<\|message\|>",
    )
    .expect("valid regex")
});

static TERSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)to=(?:(?:tool|functions)[:\s.])?([a-z0-9_-]+)\s*").expect("valid regex")
});

pub struct ChannelMarkup;

#[derive(Clone, Copy)]
enum Flavour {
    Full,
    Channel,
    Terse,
}

impl Flavour {
    fn pattern(self) -> &'static Regex {
        match self {
            Flavour::Full => &FULL,
            Flavour::Channel => &CHANNEL,
            Flavour::Terse => &TERSE,
        }
    }
}

impl ChannelMarkup {
    fn try_flavour(text: &str, flavour: Flavour) -> Option<ToolCall> {
        for caps in flavour.pattern().captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(json_start) = skip_whitespace(text, whole.end()) else {
                continue;
            };
            let Some(json_end) = balanced_object_end(text, json_start) else {
                continue;
            };
            let Some(args) = text.get(json_start..json_end).and_then(parse_object) else {
                continue;
            };

            let mut end = json_end;
            if let Flavour::Full = flavour {
                match skip_whitespace(text, json_end) {
                    Some(pos) if text.get(pos..).is_some_and(|t| t.starts_with(CALL_MARKER)) => {
                        end = pos + CALL_MARKER.len();
                    }
                    _ => continue,
                }
            }

            let raw = text.get(whole.start()..end).unwrap_or_default();
            return Some(ToolCall::new(
                names::resolve_alias(name.as_str()),
                ToolArguments::Structured(args),
                raw,
                "qwen_style",
            ));
        }
        None
    }
}

/// Offset of the first non-whitespace byte at or after `from`.
fn skip_whitespace(text: &str, from: usize) -> Option<usize> {
    let rest = text.get(from..)?;
    let trimmed = rest.trim_start();
    Some(from + (rest.len() - trimmed.len()))
}

impl ToolCallRecognizer for ChannelMarkup {
    fn name(&self) -> &'static str {
        "qwen_style"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        if !text.to_ascii_lowercase().contains("to=") {
            return None;
        }
        [Flavour::Full, Flavour::Channel, Flavour::Terse]
            .into_iter()
            .find_map(|flavour| Self::try_flavour(text, flavour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_envelope_maps_create_to_code_edit() {
        let text = r#"<|start|>assistant<|channel|>commentary to=tool:create <|constrain|>json<|message|>{"filepath":"test.py","content":"print(1)"}<|call|>"#;
        let call = ChannelMarkup.try_parse(text).unwrap();
        assert_eq!(call.name, "code-edit");
        assert_eq!(call.arguments.get("filepath"), Some(&json!("test.py")));
        assert!(call.raw_match.ends_with("<|call|>"));
    }

    #[test]
    fn channel_without_end_marker() {
        let text = r#"<|channel|>commentary to=functions.search <|message|>{"query": "TODO"}"#;
        let call = ChannelMarkup.try_parse(text).unwrap();
        assert_eq!(call.name, "code-search");
    }

    #[test]
    fn terse_prefix_with_nested_json() {
        let text = r#"to=tool:file-read {"fileName": "a.py", "opts": {"x": {"y": 1}}} trailing"#;
        let call = ChannelMarkup.try_parse(text).unwrap();
        assert_eq!(call.name, "file-read");
        assert_eq!(call.arguments.get("opts"), Some(&json!({"x": {"y": 1}})));
        assert!(!call.raw_match.contains("trailing"));
    }

    #[test]
    fn alias_resolution_ignores_prefix_case() {
        for text in [
            r#"to=TOOL:Read {"fileName": "a"}"#,
            r#"TO=tool.exec {"command": "ls"}"#,
            r#"to=Search {"query": "x"}"#,
        ] {
            let call = ChannelMarkup.try_parse(text).unwrap();
            assert!(
                names::ALL.contains(&call.name.as_str()),
                "{} not canonical",
                call.name
            );
        }
    }

    #[test]
    fn invalid_json_is_no_match() {
        assert!(ChannelMarkup.try_parse("to=tool:read {fileName: a}").is_none());
        assert!(ChannelMarkup.try_parse("I went to=the store").is_none());
    }
}
