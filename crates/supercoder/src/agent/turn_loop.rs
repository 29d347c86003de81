//! The turn loop: one user request driven to completion.
//!
//! Each iteration streams a response, commits it to the history, extracts
//! tool calls, runs them in source order and feeds the combined results
//! back as a user-role message. The loop ends when a response carries no
//! tool calls, when the abort signal is observed, or after
//! `max_iterations` model calls.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::agent::config::{AgentConfig, AgentMode};
use crate::agent::events::{AgentEvent, EventHandler};
use crate::agent::prompt::{ToolCallingStyle, build_system_prompt};
use crate::api::transport::ChatTransport;
use crate::context::{CompactionOutcome, ContextManager, ContextStats, compact};
use crate::error::{AgentError, LlmError, ToolError};
use crate::parser::{ToolCall, ToolCallParser};
use crate::repomap::{PROMPT_MAP_TOKENS, REPO_MAP_HEADER, RepoMap};
use crate::tools::ToolRegistry;
use crate::{Message, strip_result_sentinels};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model answered without requesting tools.
    Completed,
    /// The abort signal was observed.
    Aborted,
    /// The iteration cap was reached while the model still requested tools.
    MaxIterations,
}

/// Result of [`Agent::run_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Text of the last committed response.
    pub text: String,
    /// Model calls made.
    pub iterations: u32,
    /// Tool calls executed.
    pub tool_calls: usize,
}

/// How often a pending stream read re-checks the abort signal.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct StreamedResponse {
    text: String,
    aborted: bool,
    error: Option<LlmError>,
}

/// Conversational coding agent.
///
/// Owns the context window and tool registry; borrows nothing, so a front
/// end can keep it across turns and swap the transport on profile changes.
///
/// ```ignore
/// let abort = AbortSignal::new();
/// let tools = ToolRegistry::new().with_builtin_tools(".", abort.clone());
/// let mut agent = Agent::new(Arc::new(client), tools, AgentConfig::default())?
///     .with_abort_signal(abort);
///
/// let outcome = agent.run_turn("list files", &LoggingHandler).await?;
/// ```
pub struct Agent {
    transport: Arc<dyn ChatTransport>,
    tools: ToolRegistry,
    parser: ToolCallParser,
    context: ContextManager,
    config: AgentConfig,
    abort: AbortSignal,
    repo_map: Option<RepoMap>,
    /// Last rendered map, appended to the system prompt.
    repo_map_text: String,
}

impl Agent {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        mut tools: ToolRegistry,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        // Known to the parser regardless of mode, so a mode switch needs no rebuild.
        let parser = ToolCallParser::with_known_tools(tools.names());
        tools.set_read_only(config.mode.is_read_only());
        let context = ContextManager::new(config.context.clone())?;
        let mut agent = Self {
            transport,
            tools,
            parser,
            context,
            config,
            abort: AbortSignal::new(),
            repo_map: None,
            repo_map_text: String::new(),
        };
        agent.refresh_system_prompt();
        Ok(agent)
    }

    /// Share `signal` instead of the agent's own. Tools built with the same
    /// signal (command execution) stop with the turn.
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = signal;
        self
    }

    /// Replace the context manager, e.g. to install a custom tokenizer or
    /// summarizer. The current system prompt is carried over.
    pub fn with_context_manager(mut self, mut context: ContextManager) -> Self {
        context.set_system_prompt(self.context.system_prompt());
        self.context = context;
        self
    }

    /// Append a repository outline to the system prompt, regenerated at
    /// the start of every turn.
    pub fn with_repo_map(mut self, repo_map: RepoMap) -> Self {
        self.repo_map_text = repo_map.generate(PROMPT_MAP_TOKENS);
        self.repo_map = Some(repo_map);
        self.refresh_system_prompt();
        self
    }

    pub fn repo_map(&self) -> Option<&RepoMap> {
        self.repo_map.as_ref()
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn mode(&self) -> AgentMode {
        self.config.mode
    }

    pub fn stats(&self) -> ContextStats {
        self.context.get_stats()
    }

    /// Point subsequent model calls at another transport. History is kept.
    pub fn set_transport(&mut self, transport: Arc<dyn ChatTransport>) {
        self.transport = transport;
    }

    /// Switch mode. Narrows or widens the tool view and rebuilds the
    /// system prompt.
    pub fn set_mode(&mut self, mode: AgentMode) {
        if mode == self.config.mode {
            return;
        }
        info!("Switching mode: {} -> {mode}", self.config.mode);
        self.config.mode = mode;
        self.tools.set_read_only(mode.is_read_only());
        self.refresh_system_prompt();
    }

    pub fn set_tool_calling_style(&mut self, style: ToolCallingStyle) {
        self.config.tool_calling_style = style;
        self.refresh_system_prompt();
    }

    fn refresh_system_prompt(&mut self) {
        let mut prompt = build_system_prompt(
            &self.tools.definitions(),
            self.config.tool_calling_style,
            self.config.mode,
            self.config.project_rules.as_deref(),
        );
        if !self.repo_map_text.is_empty() {
            prompt.push_str(&format!("\n\n{REPO_MAP_HEADER}\n{}", self.repo_map_text));
        }
        debug!("System prompt rebuilt: {} chars", prompt.len());
        self.context.set_system_prompt(prompt);
    }

    /// Copy of the history, for persistence.
    pub fn snapshot_messages(&self) -> Vec<Message> {
        self.context.messages().to_vec()
    }

    /// Replace the history, e.g. when resuming a saved session.
    pub fn restore_messages(&mut self, messages: Vec<Message>, compacted: bool) {
        self.context.replace_messages(messages);
        self.context.set_compacted(compacted);
    }

    /// Drop the history. The system prompt is kept.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Summarize the whole history through the model.
    pub async fn compact(&mut self) -> CompactionOutcome {
        compact(&mut self.context, self.transport.as_ref()).await
    }

    /// Re-scan the project off the async runtime and rebuild the prompt.
    async fn refresh_repo_map(&mut self) {
        let Some(repo_map) = self.repo_map.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || repo_map.generate(PROMPT_MAP_TOKENS)).await {
            Ok(text) => {
                self.repo_map_text = text;
                self.refresh_system_prompt();
            }
            Err(e) => warn!("Repo map refresh failed: {e}"),
        }
    }

    fn push(&mut self, message: Message, handler: &dyn EventHandler) {
        if let Some(report) = self.context.add_message(message) {
            handler.on_event(&AgentEvent::ContextCompressed(&report));
        }
    }

    /// Drive `input` to completion.
    ///
    /// Empty `input` continues from the current history without adding a
    /// user message. Transport failures end the turn with `Err` after the
    /// partial response has been committed; aborts and the iteration cap
    /// are reported through [`TurnOutcome::status`].
    pub async fn run_turn(
        &mut self,
        input: &str,
        handler: &dyn EventHandler,
    ) -> Result<TurnOutcome, AgentError> {
        self.abort.reset();
        self.refresh_repo_map().await;
        let input = input.trim();
        if !input.is_empty() {
            self.push(Message::user(input), handler);
        }

        let max_iterations = self.config.max_iterations;
        let mut outcome = TurnOutcome {
            status: TurnStatus::Completed,
            text: String::new(),
            iterations: 0,
            tool_calls: 0,
        };

        for iteration in 1..=max_iterations {
            outcome.iterations = iteration;
            let stats = self.context.get_stats();
            handler.on_event(&AgentEvent::IterationStart {
                iteration,
                max_iterations,
                stats: &stats,
            });

            let messages = self.context.get_messages_for_api();
            let streamed = self.stream_response(&messages, handler).await;

            // Commit whatever was produced, so the history matches what was shown.
            let text = strip_result_sentinels(&streamed.text);
            if !text.trim().is_empty() {
                self.push(Message::assistant(text.clone()), handler);
            }
            outcome.text = text;

            if let Some(error) = streamed.error {
                handler.on_event(&AgentEvent::Error(&error.to_string()));
                return Err(AgentError::Transport(error));
            }
            if streamed.aborted {
                handler.on_event(&AgentEvent::Aborted);
                outcome.status = TurnStatus::Aborted;
                return Ok(outcome);
            }
            handler.on_event(&AgentEvent::ResponseComplete(&outcome.text));

            let calls = self.parser.parse_all(&outcome.text);
            if calls.is_empty() {
                handler.on_event(&AgentEvent::Finished);
                return Ok(outcome);
            }
            info!(
                "Turn iteration {iteration}/{max_iterations}: {} tool call(s)",
                calls.len()
            );
            handler.on_event(&AgentEvent::ToolCallsParsed {
                iteration,
                count: calls.len(),
            });

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if self.abort.is_aborted() {
                    debug!("Abort observed with {} call(s) pending", calls.len() - results.len());
                    break;
                }
                results.push(self.execute_call(call, handler).await);
            }
            outcome.tool_calls += results.len();
            if !results.is_empty() {
                self.push(Message::tool_results(&results.join("\n\n")), handler);
            }

            if self.abort.is_aborted() {
                handler.on_event(&AgentEvent::Aborted);
                outcome.status = TurnStatus::Aborted;
                return Ok(outcome);
            }
        }

        warn!("Turn stopped after {max_iterations} iteration(s) with tool calls pending");
        handler.on_event(&AgentEvent::MaxIterationsReached { max_iterations });
        outcome.status = TurnStatus::MaxIterations;
        Ok(outcome)
    }

    /// Consume one streamed response, stopping early on abort.
    async fn stream_response(
        &self,
        messages: &[Message],
        handler: &dyn EventHandler,
    ) -> StreamedResponse {
        let mut out = StreamedResponse::default();
        let mut stream = self.transport.chat_stream(messages);

        loop {
            if self.abort.is_aborted() {
                out.aborted = true;
                break;
            }
            // A stalled transport must not hide an abort.
            let next = tokio::select! {
                next = stream.next() => next,
                () = self.abort_requested() => {
                    out.aborted = true;
                    break;
                }
            };
            match next {
                Some(Ok(chunk)) => {
                    if !chunk.reasoning.is_empty() {
                        handler.on_event(&AgentEvent::ReasoningDelta(&chunk.reasoning));
                    }
                    if !chunk.content.is_empty() {
                        out.text.push_str(&chunk.content);
                        handler.on_event(&AgentEvent::TextDelta(&chunk.content));
                    }
                    if chunk.is_done {
                        break;
                    }
                }
                Some(Err(error)) => {
                    out.error = Some(error);
                    break;
                }
                None => break,
            }
        }

        // A press during the final chunk still cancels the tool phase.
        if out.error.is_none() && self.abort.is_aborted() {
            out.aborted = true;
        }
        debug!(
            "Stream ended: {} chars, aborted={}, error={}",
            out.text.len(),
            out.aborted,
            out.error.is_some()
        );
        out
    }

    /// Resolves once the abort signal is set.
    async fn abort_requested(&self) {
        while !self.abort.is_aborted() {
            tokio::time::sleep(ABORT_POLL_INTERVAL).await;
        }
    }

    /// Run one call; every failure becomes result text for the model.
    async fn execute_call(&self, call: &ToolCall, handler: &dyn EventHandler) -> String {
        let arguments = call.arguments.to_json_string();
        handler.on_event(&AgentEvent::ToolExecuting {
            name: &call.name,
            arguments: &arguments,
            format: call.format_name,
        });

        let (body, is_error) = match self.tools.execute_call(call).await {
            Ok(output) => (output, false),
            Err(ToolError::UnknownTool(name)) => {
                let message = format!("Unknown tool: {name}");
                handler.on_event(&AgentEvent::Error(&message));
                (format!("Error: unknown tool '{name}'"), true)
            }
            Err(error) => (format!("Error executing tool: {error}"), true),
        };

        handler.on_event(&AgentEvent::ToolResult {
            name: &call.name,
            result: &body,
            is_error,
        });
        format!("[{}]: {body}", call.name)
    }
}
