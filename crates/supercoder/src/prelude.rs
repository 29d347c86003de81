//! Convenience re-exports for common `supercoder` types.
//!
//! ```ignore
//! use supercoder::prelude::*;
//! ```
//!
//! Covers the client, messages, the agent with its config and handlers,
//! the context manager, the tool trait and registry, and the abort signal.
//! Recognizers, SSE decoding and session storage are imported from their
//! modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ClientConfig, Message, MessageRole, OpenAiClient};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    Agent, AgentConfig, AgentEvent, AgentMode, CompositeEventHandler, EventHandler,
    FnEventHandler, LoggingHandler, NoopHandler, ToolCallingStyle, TurnOutcome, TurnStatus,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CompressionStrategy, ContextConfig, ContextManager, ContextStats};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{Tool, ToolDef, ToolFuture, ToolRegistry, json_schema_for};

// ── Transport, cancellation, errors ─────────────────────────────────
pub use crate::abort::{AbortSignal, InterruptDetector};
pub use crate::api::ChatTransport;
pub use crate::error::{AgentError, ConfigError, LlmError, ToolError};
pub use crate::parser::{ToolCall, ToolCallParser};
pub use crate::repomap::RepoMap;
