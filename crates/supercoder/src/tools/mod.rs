//! Tools the assistant can invoke.
//!
//! Every capability (reading files, searching code, editing, running
//! commands) is a [`Tool`] implementor. Tools are collected into a
//! [`ToolRegistry`] which resolves names and aliases, normalizes arguments,
//! enforces timeouts and truncates oversized results.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait and [`ToolRegistry`].
//! - [`common`]: the built-in tools `file-read`, `code-search`, `code-edit`,
//!   `project-structure` and `command-exec`. Register all at once with
//!   [`ToolRegistry::with_builtin_tools()`].
//! - [`names`]: canonical tool names, aliases and name normalization.
//! - [`spec`]: [`ToolSpec`] builder for structured tool descriptions with
//!   `when_to_use` / `when_not_to_use` guidance.

pub mod common;
pub mod core;
pub mod names;
pub mod spec;

pub use core::{
    DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT, Tool, ToolFuture, ToolRegistry,
    normalize_arguments, truncate_result, validate_tool_arguments,
};
pub use spec::{ToolDef, ToolSpec, json_schema_for};
