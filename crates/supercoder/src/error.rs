//! Error types shared across the crate.
//!
//! Parse misses, malformed tool payloads and unknown tool names never reach
//! these types: they degrade to "no match" or to an inline error string fed
//! back to the model. What remains here is transport failure,
//! misconfiguration and I/O.

use thiserror::Error;

/// Failure talking to the chat-completions endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            LlmError::Request(msg) => crate::api::retry::is_transient_error(msg),
            LlmError::Decode(_) | LlmError::Api(_) => false,
        }
    }
}

/// Invalid configuration detected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reserved_for_response ({reserved}) must be smaller than max_tokens ({max})")]
    ReservedExceedsMax { reserved: usize, max: usize },

    #[error("compression_threshold must be in (0, 1], got {0}")]
    Threshold(f64),

    #[error("compression_target must be in (0, 1], got {0}")]
    Target(f64),

    #[error("max_tokens must be greater than zero")]
    ZeroMaxTokens,

    #[error("max_iterations must be greater than zero")]
    ZeroIterations,

    #[error("{0}")]
    Invalid(String),
}

/// Failure executing a single tool call.
///
/// The turn loop renders these as `"Error executing tool: ..."` and feeds
/// them back to the model rather than failing the turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("tool '{name}' timed out after {secs} seconds")]
    TimedOut { name: String, secs: u64 },

    #[error("tool '{0}' panicked")]
    Panicked(String),
}

/// Hard failure of a turn.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] LlmError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Returned by [`AbortSignal::check`](crate::abort::AbortSignal::check) once
/// cancellation has been requested.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation aborted")]
pub struct Aborted;

/// Failure reading or writing persisted sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session data is invalid: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("session '{0}' not found")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        let rate_limited = LlmError::Http {
            status: 429,
            body: String::new(),
        };
        let bad_request = LlmError::Http {
            status: 400,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn network_failures_are_transient() {
        assert!(LlmError::Request("connection reset by peer".into()).is_transient());
        assert!(!LlmError::Decode("expected value".into()).is_transient());
    }

    #[test]
    fn tool_error_messages() {
        assert_eq!(
            ToolError::UnknownTool("nope".into()).to_string(),
            "unknown tool 'nope'"
        );
        assert_eq!(
            ToolError::TimedOut {
                name: "command-exec".into(),
                secs: 60
            }
            .to_string(),
            "tool 'command-exec' timed out after 60 seconds"
        );
    }
}
