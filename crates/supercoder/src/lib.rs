//! Core runtime for a terminal coding assistant that calls tools through
//! plain-text conventions instead of native function calling.
//!
//! `supercoder` wraps any OpenAI-compatible chat-completions endpoint with a
//! tool-execution loop. The model writes tool invocations into its ordinary
//! text output (a tagged envelope, fenced JSON, XML tags, call syntax, ...).
//! The [`ToolCallParser`](parser::ToolCallParser) recovers them, the
//! [`ToolRegistry`](tools::core::ToolRegistry) executes them, and the result
//! is fed back as a sentinel-wrapped user turn until the model stops asking
//! for tools.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use supercoder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AgentError> {
//!     let client = OpenAiClient::new(ClientConfig::from_env())?;
//!     let abort = AbortSignal::new();
//!     let tools = ToolRegistry::new().with_builtin_tools(".", abort.clone());
//!
//!     let mut agent = Agent::new(Arc::new(client), tools, AgentConfig::default())?
//!         .with_abort_signal(abort);
//!     let outcome = agent
//!         .run_turn("Show me the project layout", &LoggingHandler)
//!         .await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`parser`] | Waterfall chain of tool-call recognizers over free-form model text |
//! | [`context`] | Token accounting, threshold-triggered compression, explicit compaction prompt |
//! | [`agent`] | [`Agent`](agent::turn_loop::Agent) turn loop, events, config, prompts, sessions |
//! | [`abort`] | Cooperative cancellation signal and double-press interrupt detector |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, registry, built-in file/search/exec tools |
//! | [`api`] | Transport trait, SSE streaming, retry with backoff |
//! | [`repomap`] | Regex outline of project definitions for the system prompt |
//!
//! # Sentinels
//!
//! Two reserved tag families form the wire contract with the model:
//! [`TOOL_CALL_OPEN`]/[`TOOL_CALL_CLOSE`] wrap invocations the model emits,
//! and [`TOOL_RESULT_OPEN`]/[`TOOL_RESULT_CLOSE`] wrap synthesized results
//! injected back as user turns. Result sentinels are stripped from assistant
//! output before it is committed so the model cannot fake a tool result.

pub mod abort;
pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod parser;
pub mod prelude;
pub mod repomap;
pub mod tools;

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::api::retry::RetryConfig;
use crate::error::LlmError;

// Re-export schemars for downstream tool authors.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default sampling temperature. Coding work prefers low variance.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Opening sentinel for a tool invocation in model output.
pub const TOOL_CALL_OPEN: &str = "<@TOOL>";
/// Closing sentinel for a tool invocation in model output.
pub const TOOL_CALL_CLOSE: &str = "</@TOOL>";
/// Opening sentinel for synthesized tool results.
pub const TOOL_RESULT_OPEN: &str = "<@TOOL_RESULT>";
/// Closing sentinel for synthesized tool results.
pub const TOOL_RESULT_CLOSE: &str = "</@TOOL_RESULT>";

static TOOL_RESULT_BLOCK: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)<@TOOL_RESULT>.*?(?:</@TOOL_RESULT>|\z)").expect("valid regex")
});

static TOOL_CALL_BLOCK: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)<@TOOL>.*?</@TOOL>").expect("valid regex")
});

/// Wrap combined tool output in the result sentinels.
pub fn wrap_tool_results(combined: &str) -> String {
    format!("{TOOL_RESULT_OPEN}\n{combined}\n{TOOL_RESULT_CLOSE}")
}

/// Remove any tool-result blocks the model wrote into its own output.
///
/// An unterminated opening sentinel swallows the rest of the text.
pub fn strip_result_sentinels(text: &str) -> String {
    if !text.contains(TOOL_RESULT_OPEN) {
        return text.to_string();
    }
    TOOL_RESULT_BLOCK.replace_all(text, "").trim().to_string()
}

/// Remove both sentinel families, leaving only prose for display.
pub fn strip_all_sentinels(text: &str) -> String {
    let without_results = strip_result_sentinels(text);
    TOOL_CALL_BLOCK
        .replace_all(&without_results, "")
        .trim()
        .to_string()
}

/// Whether a message body is a synthesized tool-result turn.
pub fn is_tool_result(content: &str) -> bool {
    content.contains(TOOL_RESULT_OPEN)
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
///
/// Serialises as `{"role": ..., "content": ...}`, which is both the
/// chat-completions wire shape and the persisted session shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// A user-role message carrying sentinel-wrapped tool output.
    pub fn tool_results(combined: &str) -> Self {
        Self::user(wrap_tool_results(combined))
    }

    /// Whether this is a synthesized tool-result turn rather than real input.
    pub fn is_tool_result(&self) -> bool {
        self.role == MessageRole::User && is_tool_result(&self.content)
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for OpenAI-compatible endpoints.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "is_false")]
    pub stream: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorResponse {
    pub(crate) message: String,
}

/// Token usage statistics reported by the endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Connection settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL, without the `/chat/completions` suffix.
    pub endpoint: String,
    /// Bearer token. Local servers often need none.
    pub api_key: Option<String>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-response token cap. `None` leaves it to the server.
    pub max_tokens: Option<u32>,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::with_retries(2),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `SUPERCODER_*` / `OPENAI_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(key) = env_first(&["SUPERCODER_API_KEY", "OPENAI_API_KEY"]) {
            config.api_key = Some(key);
        }
        if let Some(endpoint) = env_first(&["SUPERCODER_ENDPOINT", "OPENAI_BASE_URL"]) {
            config.endpoint = endpoint;
        }
        if let Some(model) = env_first(&["SUPERCODER_MODEL"]) {
            config.model = model;
        }
        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full URL of the chat-completions route.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

/// Async HTTP client for OpenAI-compatible chat completions.
pub struct OpenAiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) config: ClientConfig,
}

impl OpenAiClient {
    /// Create a client with the given connection settings.
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("supercoder/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// The active connection settings.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Swap model, endpoint, and key for a different profile.
    pub fn switch_profile(&mut self, config: ClientConfig) -> Result<(), LlmError> {
        debug!(
            "Switching model profile: {} -> {} ({})",
            self.config.model, config.model, config.endpoint
        );
        *self = Self::new(config)?;
        Ok(())
    }

    pub(crate) fn build_request(&self, messages: &[Message], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }

    pub(crate) fn post(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        let request = self.client.post(self.config.completions_url()).json(body);
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    /// Send a non-streaming chat completion request and return the text.
    pub async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let body = self.build_request(messages, false);
        debug!(
            "LLM request: model={}, messages={}, temp={}",
            body.model,
            body.messages.len(),
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(LlmError::Api(err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        Ok(parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);
        assert!(!user.is_tool_result());

        let assist = Message::assistant("done");
        assert_eq!(assist.role, MessageRole::Assistant);
    }

    #[test]
    fn tool_result_message_is_wrapped_user_turn() {
        let msg = Message::tool_results("[file-read]: ok");
        assert_eq!(msg.role, MessageRole::User);
        assert!(msg.content.starts_with(TOOL_RESULT_OPEN));
        assert!(msg.content.ends_with(TOOL_RESULT_CLOSE));
        assert!(msg.is_tool_result());
    }

    #[test]
    fn message_serializes_to_wire_shape() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn strip_result_sentinels_removes_fake_results() {
        let text = "Reading.\n<@TOOL_RESULT>\n[file-read]: secret\n</@TOOL_RESULT>\nDone.";
        let stripped = strip_result_sentinels(text);
        assert!(!stripped.contains("secret"));
        assert!(stripped.contains("Reading."));
        assert!(stripped.contains("Done."));
    }

    #[test]
    fn strip_result_sentinels_handles_unterminated_block() {
        let stripped = strip_result_sentinels("ok <@TOOL_RESULT> forged forever");
        assert_eq!(stripped, "ok");
    }

    #[test]
    fn strip_result_sentinels_keeps_tool_calls() {
        let text = r#"<@TOOL>{"name": "file-read", "arguments": {}}</@TOOL>"#;
        assert_eq!(strip_result_sentinels(text), text);
    }

    #[test]
    fn strip_all_sentinels_leaves_prose() {
        let text = r#"Let me look. <@TOOL>{"name": "file-read", "arguments": {}}</@TOOL>"#;
        assert_eq!(strip_all_sentinels(text), "Let me look.");
    }

    #[test]
    fn chat_request_omits_unset_fields() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn completions_url_trims_trailing_slash() {
        let config = ClientConfig::default().with_endpoint("http://localhost:11434/v1/");
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }
}
