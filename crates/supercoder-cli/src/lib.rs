//! Interactive terminal front end for the `supercoder` agent.
//!
//! The binary wires these together:
//!
//! - [`config`]: layered TOML settings and model profiles.
//! - [`logging`]: file-backed tracing subscriber.
//! - [`input`]: prompt line editor with history and command completion.
//! - [`listener`]: ESC double-press interrupt during a turn.
//! - [`printer`]: renders agent events on the terminal.
//! - [`repl`]: the read-eval-print loop and slash commands.
//!
//! ```sh
//! # Interactive session in the current project
//! supercoder
//!
//! # One-shot, read-only
//! supercoder --mode ask --prompt "Where is the retry policy defined?"
//! ```

pub mod config;
pub mod input;
pub mod listener;
pub mod logging;
pub mod printer;
pub mod repl;

pub use config::{CliConfigError, FlagLayer, Settings};
pub use printer::TerminalPrinter;
pub use repl::Repl;
