//! Configuration for the [`Agent`](super::Agent).
//!
//! ```ignore
//! let config = AgentConfig::default()
//!     .with_max_iterations(10)
//!     .with_mode(AgentMode::Ask)
//!     .with_context(ContextConfig::default().with_max_tokens(16_000));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agent::prompt::ToolCallingStyle;
use crate::context::ContextConfig;
use crate::error::ConfigError;

/// Upper bound on model calls per user request.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

// ── AgentMode ──────────────────────────────────────────────────────

/// Operating mode. Decides which tools are offered and how the system
/// prompt frames the assistant's permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Full access: edits and commands allowed.
    #[default]
    Code,
    /// Read-only question answering.
    Ask,
}

impl AgentMode {
    /// Whether mutating tools are hidden in this mode.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Ask)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Code => "full editing: read, edit, search and run commands",
            Self::Ask => "read-only: answer questions about the code",
        }
    }

    /// Text appended to the system prompt.
    pub fn prompt_suffix(self) -> &'static str {
        match self {
            Self::Code => CODE_MODE_SUFFIX,
            Self::Ask => ASK_MODE_SUFFIX,
        }
    }
}

const CODE_MODE_SUFFIX: &str = "\
MODE: CODE (Full editing enabled)

You are in CODE mode with FULL capabilities. Use the available tools to accomplish tasks.
You are authorized to edit and create files and to execute shell commands and scripts.
Do not refuse to execute commands. Use the tools provided.";

const ASK_MODE_SUFFIX: &str = "\
IMPORTANT: You are in ASK mode.

You CAN:
- Answer questions about the code
- Explain how code works
- Suggest approaches and solutions
- Read files to understand the codebase

You CANNOT:
- Edit or modify any files
- Create new files
- Execute commands that modify the system

If asked to make changes, explain what would be needed and suggest switching with /mode code.";

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Code => "code",
            Self::Ask => "ask",
        })
    }
}

impl FromStr for AgentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "ask" => Ok(Self::Ask),
            other => Err(ConfigError::Invalid(format!(
                "unknown mode '{other}' (expected code or ask)"
            ))),
        }
    }
}

// ── AgentConfig ────────────────────────────────────────────────────

/// Turn-loop settings.
///
/// Sampling parameters (temperature, response token cap) belong to the
/// transport's [`ClientConfig`](crate::ClientConfig).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model calls allowed per `run_turn` before giving up.
    pub max_iterations: u32,
    pub mode: AgentMode,
    pub context: ContextConfig,
    /// Which tool-calling instructions the system prompt carries.
    pub tool_calling_style: ToolCallingStyle,
    /// Project rules appended to the system prompt.
    pub project_rules: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            mode: AgentMode::default(),
            context: ContextConfig::default(),
            tool_calling_style: ToolCallingStyle::default(),
            project_rules: None,
        }
    }
}

impl AgentConfig {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_tool_calling_style(mut self, style: ToolCallingStyle) -> Self {
        self.tool_calling_style = style;
        self
    }

    /// Blank rules are treated as absent.
    pub fn with_project_rules(mut self, rules: impl Into<String>) -> Self {
        let rules = rules.into();
        self.project_rules = (!rules.trim().is_empty()).then_some(rules);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        self.context.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.mode, AgentMode::Code);
        assert!(config.project_rules.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let config = AgentConfig::default().with_max_iterations(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroIterations)));
    }

    #[test]
    fn invalid_context_rejected() {
        let config = AgentConfig::default()
            .with_context(ContextConfig::default().with_max_tokens(100).with_reserved_for_response(200));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReservedExceedsMax { .. })
        ));
    }

    #[test]
    fn blank_rules_are_dropped() {
        assert!(AgentConfig::default().with_project_rules("  \n").project_rules.is_none());
        assert_eq!(
            AgentConfig::default().with_project_rules("use tabs").project_rules.as_deref(),
            Some("use tabs")
        );
    }

    #[test]
    fn mode_parsing_and_tools() {
        assert_eq!("ASK".parse::<AgentMode>().unwrap(), AgentMode::Ask);
        assert_eq!(" code ".parse::<AgentMode>().unwrap(), AgentMode::Code);
        assert!("plan".parse::<AgentMode>().is_err());
        assert_eq!(AgentMode::Ask.to_string(), "ask");
        assert!(!AgentMode::Code.is_read_only());
        assert!(AgentMode::Ask.is_read_only());
    }
}
