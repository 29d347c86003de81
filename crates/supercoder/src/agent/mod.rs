//! Agent runtime: the turn loop and its supporting pieces.
//!
//! - [`turn_loop::Agent`]: streams responses, runs parsed tool calls and
//!   feeds results back until the model stops calling tools. Start here.
//! - [`config`]: [`AgentConfig`] and the [`AgentMode`] tool views.
//! - [`events`]: [`AgentEvent`] and the [`EventHandler`] observers.
//! - [`prompt`]: system prompt assembly and [`ToolCallingStyle`].
//! - [`rules`]: project rules from `.supercoder/`.
//! - [`session`]: JSON session persistence.

pub mod config;
pub mod events;
pub mod prompt;
pub mod rules;
pub mod session;
pub mod turn_loop;

pub use config::{AgentConfig, AgentMode, DEFAULT_MAX_ITERATIONS};
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use prompt::{SystemPromptBuilder, ToolCallingStyle, build_system_prompt};
pub use rules::ProjectRules;
pub use session::{ChatSession, SessionManager, SessionSummary};
pub use turn_loop::{Agent, TurnOutcome, TurnStatus};
