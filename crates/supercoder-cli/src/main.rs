//! Terminal coding assistant.
//!
//! Reads the API key from the config file or `SUPERCODER_API_KEY`.
//!
//! ```sh
//! # Interactive mode
//! supercoder --workdir /path/to/project
//!
//! # One-shot mode
//! supercoder --prompt "Add error handling to src/main.rs"
//! ```

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use supercoder::agent::{
    Agent, AgentMode, CompositeEventHandler, LoggingHandler, ProjectRules, SessionManager,
    ToolCallingStyle, TurnStatus,
};
use supercoder::abort::AbortSignal;
use supercoder::OpenAiClient;
use supercoder::repomap::RepoMap;
use tracing::{info, warn};

use supercoder_cli::input::{History, PlainInput, TerminalInput};
use supercoder_cli::repl::COMMANDS;
use supercoder_cli::{FlagLayer, Repl, Settings, TerminalPrinter, logging};

/// AI coding assistant for the terminal.
#[derive(Parser)]
#[command(name = "supercoder", version)]
struct Cli {
    /// Initial prompt (one-shot mode). Without this, starts the REPL.
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Model profile from the config file.
    #[arg(long)]
    profile: Option<String>,

    /// Model id, overriding the profile.
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// API endpoint (base URL), overriding the profile.
    #[arg(long, short = 'e')]
    endpoint: Option<String>,

    /// Sampling temperature.
    #[arg(long, short = 't')]
    temperature: Option<f32>,

    /// Context window size in tokens.
    #[arg(long = "max-context", short = 'c')]
    max_context: Option<usize>,

    /// Tool calling instructions: supercoder, qwen_like, json_block, xml_function.
    #[arg(long)]
    tool_style: Option<ToolCallingStyle>,

    /// Agent mode: code (all tools) or ask (read-only).
    #[arg(long, default_value = "code")]
    mode: AgentMode,

    /// Project directory for file and command tools.
    #[arg(long, default_value = ".")]
    workdir: String,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    debug: bool,

    /// Leave the repository map out of the system prompt.
    #[arg(long)]
    no_repo_map: bool,
}

impl Cli {
    fn flags(&self) -> FlagLayer {
        FlagLayer {
            profile: self.profile.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            temperature: self.temperature,
            max_context_tokens: self.max_context,
            tool_calling_style: self.tool_style,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let root = std::fs::canonicalize(&cli.workdir).unwrap_or_else(|_| PathBuf::from(&cli.workdir));

    let settings = match Settings::load(&root, &cli.flags()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let logging = match logging::init(&root, settings.debug) {
        Ok(logging) => Some(logging),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        }
    };

    let rules = ProjectRules::load(&root);
    let abort = AbortSignal::new();
    let tools = settings.build_tools(&root, abort.clone());
    let tool_count = tools.len();
    let agent_config = settings.agent_config(cli.mode, rules.to_prompt());

    let client = match OpenAiClient::new(settings.client_config()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            std::process::exit(1);
        }
    };
    let mut agent = match Agent::new(Arc::new(client), tools, agent_config) {
        Ok(agent) if cli.no_repo_map => agent.with_abort_signal(abort),
        Ok(agent) => agent
            .with_abort_signal(abort)
            .with_repo_map(RepoMap::new(&root)),
        Err(e) => {
            eprintln!("Failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Starting supercoder {}: model={}, endpoint={}, root={}",
        env!("CARGO_PKG_VERSION"),
        settings.model,
        settings.endpoint,
        root.display()
    );

    if let Some(prompt) = &cli.prompt {
        let handler = CompositeEventHandler::new()
            .with(TerminalPrinter::stdout().with_reasoning(settings.debug))
            .with(LoggingHandler);
        match agent.run_turn(prompt, &handler).await {
            Ok(outcome) if outcome.status == TurnStatus::Completed => {}
            Ok(_) => std::process::exit(2),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("SuperCoder v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: {} ({})", settings.model, settings.active_profile);
    println!("Endpoint: {}", settings.endpoint);
    println!("Context: {} tokens", settings.max_context_tokens);
    println!("Mode: {}", agent.mode());
    println!("Tools: {tool_count} available");
    println!(
        "RepoMap: {}",
        if agent.repo_map().is_some() { "Enabled" } else { "Disabled" }
    );
    if !rules.is_empty() {
        println!("Project rules: loaded");
    }
    if let Some(logging) = &logging {
        println!("Logs: {}", logging.path().display());
    }
    println!();

    let sessions = match SessionManager::for_project(&root) {
        Ok(manager) => Some(manager),
        Err(e) => {
            warn!("Sessions disabled: {e}");
            None
        }
    };

    let mut repl = Repl::new(agent, settings, sessions, logging);
    let result = if io::stdin().is_terminal() {
        let mut input = TerminalInput::new(History::for_project(&root), COMMANDS);
        repl.run(&mut input).await
    } else {
        repl.run(&mut PlainInput::new(io::stdin().lock())).await
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
