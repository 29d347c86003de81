//! System prompt assembly.
//!
//! [`SystemPromptBuilder`] joins headed sections; [`build_system_prompt`]
//! uses it to combine the tool list, the tool-calling instructions for the
//! configured [`ToolCallingStyle`], the working rules, the mode suffix and
//! any project rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::agent::config::AgentMode;
use crate::error::ConfigError;
use crate::tools::ToolDef;

/// Builder for multi-section prompts.
///
/// Sections are joined with blank lines. Empty sections are skipped.
///
/// ```
/// use supercoder::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a coding assistant.")
///     .section("Rules", "Be concise.")
///     .section_opt("Project Rules", None::<String>)
///     .build();
///
/// assert_eq!(prompt, "You are a coding assistant.\n\n# Rules\n\nBe concise.");
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
    heading_prefix: String,
}

impl SystemPromptBuilder {
    /// Start with a preamble, included as-is.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
            heading_prefix: "#".to_string(),
        }
    }

    /// Heading depth for subsequent sections. Default 1.
    pub fn heading_level(mut self, level: u8) -> Self {
        self.heading_prefix = "#".repeat(usize::from(level.max(1)));
        self
    }

    /// Append a headed section. Skipped if `content` is blank.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections
                .push(format!("{} {heading}\n\n{}", self.heading_prefix, content.trim_end()));
        }
        self
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    /// Append text without a heading. Skipped if blank.
    pub fn raw(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(content.trim_end().to_string());
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

// ── Tool-calling styles ────────────────────────────────────────────

/// Which call syntax the system prompt teaches the model.
///
/// Every style is accepted by the parser chain regardless of this setting;
/// the style only picks the instructions that match what a given model
/// family emits most reliably.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallingStyle {
    /// `<@TOOL>{"name": ..., "arguments": ...}</@TOOL>`
    #[default]
    Supercoder,
    /// `to=tool:<name> {json}`
    QwenLike,
    /// Fenced ```json blocks.
    JsonBlock,
    /// `<function_call name="...">{json}</function_call>`
    XmlFunction,
}

impl ToolCallingStyle {
    pub const ALL: [ToolCallingStyle; 4] = [
        Self::Supercoder,
        Self::QwenLike,
        Self::JsonBlock,
        Self::XmlFunction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supercoder => "supercoder",
            Self::QwenLike => "qwen_like",
            Self::JsonBlock => "json_block",
            Self::XmlFunction => "xml_function",
        }
    }

    /// Parse `name`, falling back to the default style with a warning.
    pub fn from_name_lossy(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown tool calling type '{name}', using supercoder");
            Self::default()
        })
    }

    /// Instruction body for the "Tool Calling" section.
    pub fn instructions(self) -> &'static str {
        match self {
            Self::Supercoder => SUPERCODER_INSTRUCTIONS,
            Self::QwenLike => QWEN_LIKE_INSTRUCTIONS,
            Self::JsonBlock => JSON_BLOCK_INSTRUCTIONS,
            Self::XmlFunction => XML_FUNCTION_INSTRUCTIONS,
        }
    }
}

impl fmt::Display for ToolCallingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCallingStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown tool calling type '{s}'")))
    }
}

const SUPERCODER_INSTRUCTIONS: &str = r#"Call tools with <@TOOL>{"name": "<tool-name>", "arguments": <json-args>}</@TOOL>

Example:
<@TOOL>{"name": "file-read", "arguments": {"fileName": "main.py"}}</@TOOL>

You can call multiple tools in one response:
<@TOOL>{"name": "file-read", "arguments": {"fileName": "file1.py"}}</@TOOL>
<@TOOL>{"name": "file-read", "arguments": {"fileName": "file2.py"}}</@TOOL>"#;

const QWEN_LIKE_INSTRUCTIONS: &str = r#"Call tools using this format:
to=tool:<tool-name> <json-arguments>

Example:
to=tool:file-read {"fileName": "main.py"}

More examples:
to=tool:code-edit {"filepath": "app.py", "operation": "create", "content": "print('hello')"}
to=tool:command-exec {"command": "ls -la", "timeout": 30}
to=tool:code-search {"query": "def main"}
to=tool:project-structure {"path": "."}

Always use valid JSON for arguments, with double quotes for strings."#;

const JSON_BLOCK_INSTRUCTIONS: &str = r#"Call tools using JSON code blocks:

```json
{"tool": "<tool-name>", "arguments": {"arg1": "value1", "arg2": "value2"}}
```

Example:
```json
{"tool": "file-read", "arguments": {"fileName": "main.py"}}
```

Use proper JSON formatting with double quotes."#;

const XML_FUNCTION_INSTRUCTIONS: &str = r#"Call tools using XML syntax:

<function_call name="<tool-name>">
{"arg1": "value1", "arg2": "value2"}
</function_call>

Example:
<function_call name="file-read">
{"fileName": "main.py"}
</function_call>"#;

const PREAMBLE: &str = "You are a coding assistant.";

const WORKING_RULES: &str = "\
1. Read files before editing
2. Use diff-based edits when possible
3. Ask before destructive commands
4. Be concise in responses";

/// `- name: description` lines, with argument names when the schema has any.
pub fn format_tool_list(tools: &[ToolDef]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_string();
    }
    tools
        .iter()
        .map(|t| {
            let params = t.parameter_names();
            if params.is_empty() {
                format!("- {}: {}", t.name, t.description)
            } else {
                format!("- {}: {} (args: {})", t.name, t.description, params.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full system prompt for the given tools, style, mode and project rules.
pub fn build_system_prompt(
    tools: &[ToolDef],
    style: ToolCallingStyle,
    mode: AgentMode,
    project_rules: Option<&str>,
) -> String {
    SystemPromptBuilder::new(PREAMBLE)
        .section("Tool Calling", style.instructions())
        .section("Available Tools", format_tool_list(tools))
        .section("Rules", WORKING_RULES)
        .raw(mode.prompt_suffix())
        .section_opt(
            "Project Rules",
            project_rules.map(|rules| {
                format!("The following are project-specific coding rules you MUST follow:\n\n{rules}")
            }),
        )
        .build()
}
