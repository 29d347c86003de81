//! Line-based REPL: chat input goes to the turn loop, slash commands are
//! handled locally.

use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use supercoder::abort::InterruptDetector;
use supercoder::agent::{
    Agent, AgentMode, ChatSession, CompositeEventHandler, LoggingHandler, SessionManager,
    SessionSummary, TurnStatus,
};
use supercoder::context::{CompactionOutcome, ContextStats};
use supercoder::OpenAiClient;
use supercoder::tools::ToolDef;

use crate::config::Settings;
use crate::input::{LineSource, ReadOutcome};
use crate::listener::KeyboardListener;
use crate::logging::Logging;
use crate::printer::{TerminalPrinter, preview};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    Compact,
    Stats,
    Tools,
    Mode(Option<String>),
    Sessions,
    Continue(Option<String>),
    Models,
    Model(Option<String>),
    Config,
    Debug,
    Exit,
}

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Command(Command),
    /// Looks like a slash command but is not one.
    Unknown(String),
    Chat(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::to_string);

    let command = match head.as_str() {
        "/help" | "/?" => Command::Help,
        "/clear" => Command::Clear,
        "/compact" => Command::Compact,
        "/stats" => Command::Stats,
        "/tools" => Command::Tools,
        "/mode" => Command::Mode(arg),
        "/sessions" => Command::Sessions,
        "/continue" => Command::Continue(arg),
        "/models" => Command::Models,
        "/model" => Command::Model(arg),
        "/config" => Command::Config,
        "/debug" => Command::Debug,
        "/exit" | "/quit" => Command::Exit,
        "exit" | "quit" if arg.is_none() => Command::Exit,
        other => {
            // `/usr/bin is missing` is a message, `/hepl` is a typo.
            let word = other.strip_prefix('/');
            return match word {
                Some(w) if !w.is_empty() && w.chars().all(|c| c.is_ascii_alphabetic()) => {
                    Input::Unknown(other.to_string())
                }
                _ => Input::Chat(line.to_string()),
            };
        }
    };
    Input::Command(command)
}

/// Words offered by tab completion at the prompt.
pub const COMMANDS: &[&str] = &[
    "/clear", "/compact", "/config", "/continue", "/debug", "/exit", "/help", "/mode", "/model",
    "/models", "/quit", "/sessions", "/stats", "/tools",
];

pub const HELP: &str = "\
Available Commands:
  /continue [n] - Resume a previous session
  /sessions     - List saved sessions
  /clear        - Clear conversation history
  /compact      - Summarize context and reduce tokens
  /stats        - Show context window stats
  /tools        - List available tools
  /mode [name]  - Show or switch mode: code, ask
  /models       - List available model profiles
  /model <name> - Switch model profile
  /config       - Show current configuration
  /debug        - Toggle debug logging
  /exit         - Quit SuperCoder

Press ESC twice while the assistant is working to interrupt it.
Use Up/Down for input history and Tab to complete commands.";

pub fn format_sessions(sessions: &[SessionSummary], numbered: bool) -> String {
    let mut out = String::new();
    for (i, session) in sessions.iter().enumerate() {
        let compacted = if session.is_compacted { " (compacted)" } else { "" };
        let marker = if numbered {
            format!("{}.", i + 1)
        } else {
            "•".to_string()
        };
        out.push_str(&format!("  {marker} {}{compacted}\n", session.title));
        out.push_str(&format!(
            "      {} • {} messages\n",
            session.last_modified.format("%Y-%m-%d %H:%M"),
            session.message_count
        ));
    }
    out
}

pub fn format_compaction(before: &ContextStats, after: &ContextStats, tokens_saved: i64) -> String {
    let reduction = if before.used_tokens > 0 {
        tokens_saved as f64 / before.used_tokens as f64 * 100.0
    } else {
        0.0
    };
    format!(
        "Context compacted!\n  Before: {} tokens ({} messages)\n  After:  {} tokens ({} messages)\n  Saved:  {} tokens ({:.1}% reduction)",
        before.used_tokens,
        before.message_count,
        after.used_tokens,
        after.message_count,
        tokens_saved,
        reduction
    )
}

pub fn format_tools(tools: &[ToolDef]) -> String {
    tools
        .iter()
        .map(|t| format!("  {}: {}", t.name, preview(&t.description, 60)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Select a session by 1-based position in a listing.
pub fn pick_session<'a>(sessions: &'a [SessionSummary], choice: &str) -> Option<&'a SessionSummary> {
    let n: usize = choice.trim().parse().ok()?;
    sessions.get(n.checked_sub(1)?)
}

pub struct Repl {
    agent: Agent,
    settings: Settings,
    sessions: Option<SessionManager>,
    session: ChatSession,
    handler: CompositeEventHandler,
    detector: Arc<InterruptDetector>,
    logging: Option<Logging>,
    debug: bool,
}

impl Repl {
    pub fn new(
        agent: Agent,
        settings: Settings,
        sessions: Option<SessionManager>,
        logging: Option<Logging>,
    ) -> Self {
        let debug = settings.debug;
        let handler = CompositeEventHandler::new()
            .with(TerminalPrinter::stdout().with_reasoning(debug))
            .with(LoggingHandler);
        let detector = InterruptDetector::for_signal(agent.abort_signal()).with_first_press(|| {
            let mut out = io::stdout();
            let _ = write!(out, "\r\n[Press ESC again to interrupt]\r\n");
            let _ = out.flush();
        });
        let session = sessions
            .as_ref()
            .map_or_else(ChatSession::new, SessionManager::create);
        Self {
            agent,
            settings,
            sessions,
            session,
            handler,
            detector: Arc::new(detector),
            logging,
            debug,
        }
    }

    /// Read lines until EOF or `/exit`.
    pub async fn run(&mut self, input: &mut impl LineSource) -> io::Result<()> {
        println!("SuperCoder - Type /help for commands");
        loop {
            let line = match input.read_line("You> ")? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted => {
                    println!("Use 'exit' to quit");
                    continue;
                }
                ReadOutcome::Eof => {
                    println!();
                    break;
                }
            };
            input.remember(&line);
            match parse_input(&line) {
                Input::Empty => continue,
                Input::Unknown(cmd) => println!("Unknown command: {cmd}. Type /help for commands."),
                Input::Chat(text) => self.chat(&text).await,
                Input::Command(Command::Exit) => break,
                Input::Command(cmd) => self.command(cmd, input).await?,
            }
        }
        println!("Goodbye!");
        Ok(())
    }

    async fn chat(&mut self, text: &str) {
        println!("Assistant");
        let listener = KeyboardListener::start(self.detector.clone(), self.agent.abort_signal());
        let result = self.agent.run_turn(text, &self.handler).await;
        listener.stop();

        match result {
            Ok(outcome) => {
                debug!(
                    "Turn finished: {:?} after {} iteration(s), {} tool call(s)",
                    outcome.status, outcome.iterations, outcome.tool_calls
                );
                if outcome.status == TurnStatus::Aborted {
                    info!("Turn interrupted by user");
                }
            }
            // Already shown through the error event.
            Err(e) => warn!("Turn failed: {e}"),
        }
        println!();
        self.autosave();
    }

    fn autosave(&mut self) {
        let Some(manager) = &self.sessions else {
            return;
        };
        self.session.messages = self.agent.snapshot_messages();
        self.session.is_compacted = self.agent.context().is_compacted();
        if self.session.messages.is_empty() {
            return;
        }
        if let Err(e) = manager.save(&mut self.session) {
            warn!("Failed to save session {}: {e}", self.session.id);
        }
    }

    async fn command(&mut self, cmd: Command, input: &mut impl LineSource) -> io::Result<()> {
        match cmd {
            Command::Help => println!("\n{HELP}\n"),
            Command::Clear => {
                self.agent.clear();
                if let Some(manager) = &self.sessions {
                    self.session = manager.create();
                }
                println!("History cleared");
            }
            Command::Compact => self.compact().await,
            Command::Stats => println!("{}", self.agent.stats()),
            Command::Tools => {
                println!("\nAvailable Tools ({} mode):", self.agent.mode());
                println!("{}\n", format_tools(&self.agent.tools().definitions()));
            }
            Command::Mode(None) => {
                let mode = self.agent.mode();
                println!("Mode: {mode} ({})", mode.description());
                println!("Use /mode code or /mode ask to switch");
            }
            Command::Mode(Some(name)) => match name.parse::<AgentMode>() {
                Ok(mode) => {
                    self.agent.set_mode(mode);
                    println!("Mode: {mode} ({})", mode.description());
                }
                Err(e) => println!("{e}"),
            },
            Command::Sessions => self.list_sessions(),
            Command::Continue(choice) => self.resume(choice, input)?,
            Command::Models => self.list_models(),
            Command::Model(None) => {
                println!("Usage: /model <profile-name>");
                println!("Use /models to see available profiles");
            }
            Command::Model(Some(name)) => self.switch_model(&name),
            Command::Config => self.show_config(),
            Command::Debug => {
                self.debug = !self.debug;
                if let Some(logging) = &self.logging {
                    logging.set_debug(self.debug);
                }
                println!("Debug mode: {}", self.debug);
            }
            Command::Exit => {}
        }
        Ok(())
    }

    async fn compact(&mut self) {
        let stats = self.agent.stats();
        if stats.message_count == 0 {
            println!("No context to compact");
            return;
        }
        println!(
            "Current context: {} tokens, {} messages",
            stats.used_tokens, stats.message_count
        );
        println!("Compacting context...");
        match self.agent.compact().await {
            CompactionOutcome::Compacted {
                summary,
                before,
                after,
                tokens_saved,
            } => {
                println!("\n{}", format_compaction(&before, &after, tokens_saved));
                println!("\nSummary preview:\n{}\n", preview(&summary, 500));
                self.autosave();
            }
            CompactionOutcome::NothingToCompact { .. } => println!("No context to compact"),
            CompactionOutcome::Failed { error, .. } => println!("Compaction failed: {error}"),
        }
    }

    fn listed_sessions(&self) -> Vec<SessionSummary> {
        let Some(manager) = &self.sessions else {
            return Vec::new();
        };
        match manager.list() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Failed to list sessions: {e}");
                Vec::new()
            }
        }
    }

    fn list_sessions(&self) {
        let sessions = self.listed_sessions();
        if sessions.is_empty() {
            println!("No sessions found");
            return;
        }
        println!("\nSaved Sessions:");
        print!("{}", format_sessions(&sessions, false));
        println!("\nTotal: {} sessions", sessions.len());
        println!("Use /continue to resume a session");
    }

    fn resume(&mut self, choice: Option<String>, input: &mut impl LineSource) -> io::Result<()> {
        let sessions = self.listed_sessions();
        if sessions.is_empty() {
            println!("No previous sessions found");
            return Ok(());
        }

        let choice = match choice {
            Some(choice) => choice,
            None => {
                println!("\nAvailable Sessions:");
                print!("{}", format_sessions(&sessions, true));
                println!("\nEnter session number (or 'cancel'):");
                match input.read_line("Select> ")? {
                    ReadOutcome::Line(line) => line,
                    ReadOutcome::Interrupted | ReadOutcome::Eof => String::new(),
                }
            }
        };
        let choice = choice.trim();
        if choice.is_empty() || choice.eq_ignore_ascii_case("cancel") {
            println!("Cancelled");
            return Ok(());
        }
        let Some(summary) = pick_session(&sessions, choice) else {
            println!("Invalid selection");
            return Ok(());
        };

        let loaded = self
            .sessions
            .as_ref()
            .map(|manager| manager.load(&summary.id));
        match loaded {
            Some(Ok(session)) => {
                self.agent
                    .restore_messages(session.messages.clone(), session.is_compacted);
                self.session = session;
                let stats = self.agent.stats();
                println!("Resumed session: {}", self.session.title);
                println!(
                    "Loaded {} messages, {} tokens",
                    stats.message_count, stats.used_tokens
                );
            }
            Some(Err(e)) => println!("Failed to load session: {e}"),
            None => println!("Sessions are unavailable"),
        }
        Ok(())
    }

    fn list_models(&self) {
        if self.settings.profiles.is_empty() {
            println!("No model profiles defined in config");
            return;
        }
        println!("\nAvailable Model Profiles:");
        for (name, profile) in &self.settings.profiles {
            let marker = if *name == self.settings.active_profile {
                " <- active"
            } else {
                ""
            };
            println!("  {name}: {}{marker}", profile.model);
        }
        println!("\nUse /model <name> to switch\n");
    }

    fn switch_model(&mut self, name: &str) {
        let mut candidate = self.settings.clone();
        if let Err(e) = candidate.switch_profile(name) {
            println!("{e}");
            let available: Vec<&str> = self.settings.profiles.keys().map(String::as_str).collect();
            println!("Available: {}", available.join(", "));
            return;
        }
        match OpenAiClient::new(candidate.client_config()) {
            Ok(client) => {
                self.agent.set_transport(Arc::new(client));
                self.agent.set_tool_calling_style(candidate.tool_calling_style);
                self.settings = candidate;
                println!("Switched to {name}");
                println!("Model: {}", self.settings.model);
                println!("Endpoint: {}", self.settings.endpoint);
            }
            Err(e) => println!("Failed to switch model: {e}"),
        }
    }

    fn show_config(&self) {
        let s = &self.settings;
        println!("\nCurrent Configuration:");
        println!("  Profile: {}", s.active_profile);
        println!("  Model: {}", s.model);
        println!("  Endpoint: {}", s.endpoint);
        println!("  Temperature: {}", s.temperature);
        println!("  Debug Mode: {}", self.debug);
        println!("  Context Size: {}", s.max_context_tokens);
        println!("  Compression: {}", s.compression_strategy);
        println!("  Tool Calling: {}", self.agent.config().tool_calling_style);
        println!("  Mode: {}", self.agent.mode());
        println!("  API Key: {}", s.masked_api_key());
        if let Some(path) = &s.global_path {
            println!("  Config File: {}", path.display());
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("/help"), Input::Command(Command::Help));
        assert_eq!(parse_input("/MODE ask"), Input::Command(Command::Mode(Some("ask".into()))));
        assert_eq!(parse_input("/mode"), Input::Command(Command::Mode(None)));
        assert_eq!(parse_input("/continue 2"), Input::Command(Command::Continue(Some("2".into()))));
        assert_eq!(parse_input("/model ollama"), Input::Command(Command::Model(Some("ollama".into()))));
        assert_eq!(parse_input("/models"), Input::Command(Command::Models));
    }

    #[test]
    fn completion_covers_every_command() {
        for word in COMMANDS {
            assert!(matches!(parse_input(word), Input::Command(_)), "{word}");
        }
        assert_eq!(
            crate::input::complete("/se", COMMANDS),
            vec!["/sessions"]
        );
    }

    #[test]
    fn exit_words_work_with_and_without_slash() {
        for word in ["exit", "quit", "/exit", "/quit", " EXIT \n"] {
            assert_eq!(parse_input(word), Input::Command(Command::Exit), "{word}");
        }
    }

    #[test]
    fn unknown_commands_and_paths() {
        assert_eq!(parse_input("/hepl"), Input::Unknown("/hepl".into()));
        assert_eq!(
            parse_input("/usr/bin/env is missing"),
            Input::Chat("/usr/bin/env is missing".into())
        );
        assert_eq!(
            parse_input("  fix the parser  "),
            Input::Chat("fix the parser".into())
        );
        // Bare words only exit on their own.
        assert_eq!(
            parse_input("exit the loop early"),
            Input::Chat("exit the loop early".into())
        );
    }

    fn summary(id: &str, title: &str, compacted: bool) -> SessionSummary {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 0).unwrap();
        SessionSummary {
            id: id.into(),
            title: title.into(),
            created_at: ts,
            last_modified: ts,
            is_compacted: compacted,
            message_count: 6,
        }
    }

    #[test]
    fn session_listing_and_selection() {
        let sessions = vec![summary("a1", "Fix parser", true), summary("b2", "Add tests", false)];
        let listed = format_sessions(&sessions, true);
        assert!(listed.contains("1. Fix parser (compacted)"));
        assert!(listed.contains("2. Add tests\n"));
        assert!(listed.contains("2026-03-14 09:26 • 6 messages"));

        assert_eq!(pick_session(&sessions, "2").map(|s| s.id.as_str()), Some("b2"));
        assert!(pick_session(&sessions, "0").is_none());
        assert!(pick_session(&sessions, "3").is_none());
        assert!(pick_session(&sessions, "two").is_none());
    }

    #[test]
    fn compaction_report_shows_reduction() {
        let before = ContextStats {
            total_tokens: 32_000,
            used_tokens: 2_000,
            available_tokens: 25_904,
            message_count: 12,
            utilization_percent: 7.2,
        };
        let after = ContextStats {
            used_tokens: 500,
            message_count: 1,
            ..before
        };
        let text = format_compaction(&before, &after, 1_500);
        assert!(text.contains("Before: 2000 tokens (12 messages)"));
        assert!(text.contains("After:  500 tokens (1 messages)"));
        assert!(text.contains("Saved:  1500 tokens (75.0% reduction)"));
    }

    #[test]
    fn tool_listing_truncates_descriptions() {
        let tools = vec![ToolDef {
            name: "file-read".into(),
            description: "r".repeat(80),
            parameters: serde_json::json!({}),
        }];
        let text = format_tools(&tools);
        assert!(text.starts_with("  file-read: "));
        assert!(text.ends_with("..."));
    }
}
