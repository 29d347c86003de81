//! Bare function-call syntax: `file-read(fileName="main.py")`.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::{ToolArguments, ToolCall, ToolCallRecognizer};

static KWARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|[^,\s][^,]*)"#,
    )
    .expect("valid regex")
});

/// Only names on the allow-list are considered, so prose such as
/// `print(x)` never matches. `-` and `_` are interchangeable in the name.
pub struct CallSyntax {
    pattern: Option<Regex>,
}

impl CallSyntax {
    pub fn new(known: &[String]) -> Self {
        let alternatives: Vec<String> = known
            .iter()
            .filter(|n| !n.is_empty())
            .map(|name| {
                name.split(['-', '_'])
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join("[-_]")
            })
            .collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(
                r"(?i)(?:^|[^A-Za-z0-9_-])({})\s*\(",
                alternatives.join("|")
            ))
            .ok()
        };
        Self { pattern }
    }
}

/// Byte offset of the `)` closing the `(` just before `from`.
fn closing_paren(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (offset, &b) in bytes.get(from..)?.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> Option<String> {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

fn bare_value(value: &str) -> Value {
    match value {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::Null,
        _ => serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string())),
    }
}

fn parse_arguments(inner: &str) -> ToolArguments {
    let inner = inner.trim();
    if inner.is_empty() {
        return ToolArguments::empty();
    }

    let mut map = Map::new();
    for caps in KWARG.captures_iter(inner) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();
        let parsed = match unquote(value) {
            Some(s) => Value::String(s),
            None => bare_value(value),
        };
        map.insert(key.as_str().to_string(), parsed);
    }

    if map.is_empty() {
        // Positional form: `file-read("main.py")`.
        ToolArguments::Raw(unquote(inner).unwrap_or_else(|| inner.to_string()))
    } else {
        ToolArguments::Structured(map)
    }
}

impl ToolCallRecognizer for CallSyntax {
    fn name(&self) -> &'static str {
        "pythonic"
    }

    fn try_parse(&self, text: &str) -> Option<ToolCall> {
        let pattern = self.pattern.as_ref()?;
        pattern.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            let close = closing_paren(text, whole.end())?;
            let inner = text.get(whole.end()..close)?;
            let raw = text.get(name.start()..=close)?;
            Some(ToolCall::new(
                name.as_str(),
                parse_arguments(inner),
                raw,
                "pythonic",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::names;
    use serde_json::json;

    fn recognizer() -> CallSyntax {
        let known: Vec<String> = names::ALL.iter().map(|s| s.to_string()).collect();
        CallSyntax::new(&known)
    }

    #[test]
    fn basic_call() {
        let call = recognizer().try_parse(r#"file-read(path="main.py")"#).unwrap();
        assert_eq!(call.name, "file-read");
        assert_eq!(call.arguments, ToolArguments::from_value(json!({"path": "main.py"})));
        assert_eq!(call.raw_match, r#"file-read(path="main.py")"#);
    }

    #[test]
    fn several_keyword_arguments() {
        let call = recognizer()
            .try_parse(r#"Now: code-edit(filepath="test.py", operation="create", content="a, (b)")"#)
            .unwrap();
        assert_eq!(call.name, "code-edit");
        assert_eq!(call.arguments.get("filepath"), Some(&json!("test.py")));
        assert_eq!(call.arguments.get("content"), Some(&json!("a, (b)")));
    }

    #[test]
    fn bare_values_are_typed() {
        let call = recognizer()
            .try_parse("file_read(fileName='a.py', startLine=10, verbose=True, extra=None)")
            .unwrap();
        assert_eq!(call.name, "file_read");
        assert_eq!(call.arguments.get("startLine"), Some(&json!(10)));
        assert_eq!(call.arguments.get("verbose"), Some(&json!(true)));
        assert_eq!(call.arguments.get("extra"), Some(&Value::Null));
    }

    #[test]
    fn positional_argument_is_raw() {
        let call = recognizer().try_parse(r#"code-search("fn main")"#).unwrap();
        assert_eq!(call.arguments, ToolArguments::Raw("fn main".into()));
    }

    #[test]
    fn unknown_function_ignored() {
        assert!(recognizer().try_parse(r#"unknown_func(arg="value")"#).is_none());
        assert!(recognizer().try_parse("print(file)").is_none());
        assert!(recognizer().try_parse("my-file-read(x=1)").is_none());
    }

    #[test]
    fn unbalanced_call_is_no_match() {
        assert!(recognizer().try_parse(r#"file-read(path="main.py""#).is_none());
    }

    #[test]
    fn empty_allow_list_never_matches() {
        assert!(CallSyntax::new(&[]).try_parse("file-read()").is_none());
    }
}
