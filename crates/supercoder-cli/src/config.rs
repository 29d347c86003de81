//! Layered TOML configuration with named model profiles.
//!
//! Layers, lowest priority first:
//!
//! 1. built-in defaults
//! 2. `~/.supercoder/config.toml` (a commented template is written on first run)
//! 3. `.supercoder.toml` in the project root
//! 4. environment (`SUPERCODER_API_KEY`/`OPENAI_API_KEY`,
//!    `SUPERCODER_ENDPOINT`/`OPENAI_BASE_URL`, `SUPERCODER_MODEL`,
//!    `SUPERCODER_DEBUG`)
//! 5. command-line flags
//!
//! A later file replaces a whole `[models.<name>]` profile rather than
//! merging its keys.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use supercoder::abort::AbortSignal;
use supercoder::agent::{AgentConfig, AgentMode, ToolCallingStyle};
use supercoder::api::retry::RetryConfig;
use supercoder::tools::ToolRegistry;
use supercoder::context::{CompressionStrategy, ContextConfig};
use supercoder::{ClientConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TEMPERATURE};

/// Global config directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".supercoder";
pub const GLOBAL_CONFIG_FILE: &str = "config.toml";
/// Per-project override file, relative to the project root.
pub const PROJECT_CONFIG_FILE: &str = ".supercoder.toml";

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 32_000;
pub const DEFAULT_RESERVED_FOR_RESPONSE: usize = 4_096;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 60.0;

/// Written to the global path when no config exists yet.
pub const CONFIG_TEMPLATE: &str = r#"# SuperCoder configuration

# Model profile used on startup
default_model = "default"

# Shared settings (applied to every profile)
temperature = 0.2
max_context_tokens = 32000
reserved_for_response = 4096
request_timeout = 60.0
compression_strategy = "smart"
debug = false

[models.default]
api_key = ""
endpoint = "https://api.openai.com/v1"
model = "gpt-4o-mini"

# OpenRouter, with a model that prefers the channel call format:
# [models.openrouter-free]
# api_key = "sk-or-v1-..."
# endpoint = "https://openrouter.ai/api/v1"
# model = "openai/gpt-oss-20b:free"
# tool_calling_type = "qwen_like"  # supercoder, qwen_like, json_block, xml_function

# Local Ollama:
# [models.ollama]
# api_key = "ollama"
# endpoint = "http://localhost:11434/v1"
# model = "llama3.2"
"#;

#[derive(Debug, Error)]
pub enum CliConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("unknown model profile '{0}'")]
    UnknownProfile(String),

    #[error("API key not set. Edit {config_path} or set SUPERCODER_API_KEY")]
    MissingApiKey { config_path: String },

    #[error("request_timeout must be a positive number of seconds, got {0}")]
    Timeout(f64),

    #[error(transparent)]
    Invalid(#[from] supercoder::error::ConfigError),
}

// ── File layer ─────────────────────────────────────────────────────

/// One `[models.<name>]` table as written in a file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileFile {
    pub api_key: Option<String>,
    #[serde(alias = "base_url")]
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub tool_calling_type: Option<String>,
    pub request_timeout: Option<f64>,
}

/// Everything a config file may set. Absent keys leave lower layers alone.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub default_model: Option<String>,
    pub models: BTreeMap<String, ProfileFile>,
    pub api_key: Option<String>,
    #[serde(alias = "base_url")]
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_context_tokens: Option<usize>,
    pub reserved_for_response: Option<usize>,
    pub request_timeout: Option<f64>,
    pub compression_strategy: Option<String>,
    pub debug: Option<bool>,
}

impl FileConfig {
    /// Parse `path`, or `Ok(None)` when it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, CliConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|source| CliConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text)
            .map(Some)
            .map_err(|source| CliConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Overlay `upper` onto `self`.
    pub fn merge(mut self, upper: FileConfig) -> Self {
        self.models.extend(upper.models);
        self.default_model = upper.default_model.or(self.default_model);
        self.api_key = upper.api_key.or(self.api_key);
        self.endpoint = upper.endpoint.or(self.endpoint);
        self.model = upper.model.or(self.model);
        self.temperature = upper.temperature.or(self.temperature);
        self.max_context_tokens = upper.max_context_tokens.or(self.max_context_tokens);
        self.reserved_for_response = upper.reserved_for_response.or(self.reserved_for_response);
        self.request_timeout = upper.request_timeout.or(self.request_timeout);
        self.compression_strategy = upper.compression_strategy.or(self.compression_strategy);
        self.debug = upper.debug.or(self.debug);
        self
    }
}

// ── Environment and flag layers ────────────────────────────────────

/// Values taken from the process environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvLayer {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub debug: Option<bool>,
}

impl EnvLayer {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };
        Self {
            api_key: first(&["SUPERCODER_API_KEY", "OPENAI_API_KEY"]),
            endpoint: first(&["SUPERCODER_ENDPOINT", "SUPERCODER_BASE_URL", "OPENAI_BASE_URL"]),
            model: first(&["SUPERCODER_MODEL", "OPENAI_MODEL"]),
            debug: first(&["SUPERCODER_DEBUG"]).map(|v| v.trim().eq_ignore_ascii_case("true")),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagLayer {
    pub profile: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub temperature: Option<f32>,
    pub max_context_tokens: Option<usize>,
    pub tool_calling_style: Option<ToolCallingStyle>,
    pub debug: bool,
}

// ── Resolved settings ──────────────────────────────────────────────

/// A named connection profile after defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub name: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub tool_calling_style: ToolCallingStyle,
    pub request_timeout: Duration,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub profiles: BTreeMap<String, ModelProfile>,
    /// Name of the active profile; may not exist in `profiles` when the
    /// connection comes from top-level keys only.
    pub active_profile: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub tool_calling_style: ToolCallingStyle,
    pub request_timeout: Duration,
    pub temperature: f32,
    pub max_context_tokens: usize,
    pub reserved_for_response: usize,
    pub compression_strategy: CompressionStrategy,
    pub debug: bool,
    /// Where the global file lives, for messages.
    pub global_path: Option<PathBuf>,
}

/// `~/.supercoder/config.toml`, when a home directory is known.
pub fn global_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().join(CONFIG_DIR_NAME).join(GLOBAL_CONFIG_FILE))
}

/// Write [`CONFIG_TEMPLATE`] to `path` unless something is already there.
/// Returns whether a file was created.
pub fn ensure_template(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, CONFIG_TEMPLATE)?;
    Ok(true)
}

fn timeout_from_secs(secs: f64) -> Result<Duration, CliConfigError> {
    if secs <= 0.0 {
        return Err(CliConfigError::Timeout(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| CliConfigError::Timeout(secs))
}

impl Settings {
    /// Load every layer for a project rooted at `project_root`.
    pub fn load(project_root: &Path, flags: &FlagLayer) -> Result<Self, CliConfigError> {
        let global_path = global_config_path();
        let mut files = FileConfig::default();
        if let Some(path) = &global_path {
            // Missing template is only a convenience; a read-only home is fine.
            let _ = ensure_template(path);
            if let Some(global) = FileConfig::read(path)? {
                files = files.merge(global);
            }
        }
        if let Some(project) = FileConfig::read(&project_root.join(PROJECT_CONFIG_FILE))? {
            files = files.merge(project);
        }
        let mut settings = Self::resolve(files, &EnvLayer::from_env(), flags)?;
        settings.global_path = global_path;
        Ok(settings)
    }

    /// Combine already-read layers. No I/O.
    pub fn resolve(
        files: FileConfig,
        env: &EnvLayer,
        flags: &FlagLayer,
    ) -> Result<Self, CliConfigError> {
        let shared_timeout = files.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let mut profiles = BTreeMap::new();
        for (name, raw) in &files.models {
            let style = raw
                .tool_calling_type
                .as_deref()
                .map(ToolCallingStyle::from_name_lossy)
                .unwrap_or_default();
            profiles.insert(
                name.clone(),
                ModelProfile {
                    name: name.clone(),
                    api_key: raw.api_key.clone().unwrap_or_default(),
                    endpoint: raw.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                    model: raw.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    tool_calling_style: style,
                    request_timeout: timeout_from_secs(
                        raw.request_timeout.unwrap_or(shared_timeout),
                    )?,
                },
            );
        }

        let compression_strategy = match files.compression_strategy.as_deref() {
            Some(name) => name.parse()?,
            None => CompressionStrategy::Smart,
        };

        let mut settings = Self {
            profiles,
            active_profile: files
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            api_key: files.api_key.clone().unwrap_or_default(),
            endpoint: files.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: files.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            tool_calling_style: ToolCallingStyle::default(),
            request_timeout: timeout_from_secs(shared_timeout)?,
            temperature: files.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_context_tokens: files.max_context_tokens.unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS),
            reserved_for_response: files
                .reserved_for_response
                .unwrap_or(DEFAULT_RESERVED_FOR_RESPONSE),
            compression_strategy,
            debug: files.debug.unwrap_or(false),
            global_path: None,
        };

        let requested = flags.profile.clone().unwrap_or_else(|| settings.active_profile.clone());
        if settings.profiles.contains_key(&requested) {
            settings.switch_profile(&requested)?;
        } else if flags.profile.is_some() {
            return Err(CliConfigError::UnknownProfile(requested));
        }

        if let Some(key) = &env.api_key {
            settings.api_key = key.clone();
        }
        if let Some(endpoint) = &env.endpoint {
            settings.endpoint = endpoint.clone();
        }
        if let Some(model) = &env.model {
            settings.model = model.clone();
        }
        if let Some(debug) = env.debug {
            settings.debug = debug;
        }

        if let Some(model) = &flags.model {
            settings.model = model.clone();
        }
        if let Some(endpoint) = &flags.endpoint {
            settings.endpoint = endpoint.clone();
        }
        if let Some(temperature) = flags.temperature {
            settings.temperature = temperature;
        }
        if let Some(max) = flags.max_context_tokens {
            settings.max_context_tokens = max;
        }
        if let Some(style) = flags.tool_calling_style {
            settings.tool_calling_style = style;
        }
        settings.debug |= flags.debug;

        Ok(settings)
    }

    /// Make `name` the active profile, returning it.
    pub fn switch_profile(&mut self, name: &str) -> Result<&ModelProfile, CliConfigError> {
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| CliConfigError::UnknownProfile(name.to_string()))?;
        self.api_key = profile.api_key.clone();
        self.endpoint = profile.endpoint.clone();
        self.model = profile.model.clone();
        self.tool_calling_style = profile.tool_calling_style;
        self.request_timeout = profile.request_timeout;
        self.active_profile = name.to_string();
        Ok(profile)
    }

    /// Fails when no API key is configured anywhere.
    pub fn validate(&self) -> Result<(), CliConfigError> {
        if self.api_key.trim().is_empty() {
            let config_path = self
                .global_path
                .as_ref()
                .map_or_else(|| PROJECT_CONFIG_FILE.to_string(), |p| p.display().to_string());
            return Err(CliConfigError::MissingApiKey { config_path });
        }
        self.context_config().validate()?;
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_endpoint(self.endpoint.clone())
            .with_api_key(self.api_key.clone())
            .with_model(self.model.clone())
            .with_temperature(self.temperature)
            .with_timeout(self.request_timeout)
            .with_retry(RetryConfig::with_retries(2))
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig::default()
            .with_max_tokens(self.max_context_tokens)
            .with_reserved_for_response(self.reserved_for_response)
            .with_compression_threshold(0.7)
            .with_strategy(self.compression_strategy)
    }

    /// Agent settings for this run. Blank `project_rules` are dropped.
    pub fn agent_config(&self, mode: AgentMode, project_rules: Option<String>) -> AgentConfig {
        let config = AgentConfig::default()
            .with_mode(mode)
            .with_context(self.context_config())
            .with_tool_calling_style(self.tool_calling_style);
        match project_rules {
            Some(rules) => config.with_project_rules(rules),
            None => config,
        }
    }

    /// Built-in tools rooted at `workdir`, stopping with `abort`.
    pub fn build_tools(&self, workdir: &Path, abort: AbortSignal) -> ToolRegistry {
        ToolRegistry::new().with_builtin_tools(workdir, abort)
    }

    /// First and last four characters, or `Not Set`.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        match chars.len() {
            0 => "Not Set".to_string(),
            n if n <= 8 => "****".to_string(),
            n => {
                let head: String = chars.iter().take(4).collect();
                let tail: String = chars.iter().skip(n - 4).collect();
                format!("{head}...{tail}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> FileConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn template_parses_and_selects_default_profile() {
        let files = parse(CONFIG_TEMPLATE);
        assert_eq!(files.default_model.as_deref(), Some("default"));
        assert_eq!(files.max_context_tokens, Some(32_000));

        let settings = Settings::resolve(files, &EnvLayer::default(), &FlagLayer::default()).unwrap();
        assert_eq!(settings.active_profile, "default");
        assert_eq!(settings.endpoint, "https://api.openai.com/v1");
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.compression_strategy, CompressionStrategy::Smart);
        assert_eq!(settings.request_timeout, Duration::from_secs(60));
        assert!(settings.validate().is_err(), "template has an empty key");
    }

    #[test]
    fn project_file_overrides_global() {
        let global = parse(
            r#"
            default_model = "remote"
            temperature = 0.2
            [models.remote]
            api_key = "sk-global"
            model = "gpt-4o"
            "#,
        );
        let project = parse(
            r#"
            temperature = 0.0
            max_context_tokens = 64000
            [models.remote]
            api_key = "sk-project"
            model = "gpt-4.1"
            endpoint = "https://example.test/v1"
            "#,
        );
        let settings =
            Settings::resolve(global.merge(project), &EnvLayer::default(), &FlagLayer::default())
                .unwrap();
        assert_eq!(settings.api_key, "sk-project");
        assert_eq!(settings.model, "gpt-4.1");
        assert_eq!(settings.endpoint, "https://example.test/v1");
        assert_eq!(settings.temperature, 0.0);
        assert_eq!(settings.max_context_tokens, 64_000);
    }

    #[test]
    fn env_overrides_files_and_flags_override_env() {
        let files = parse(
            r#"
            [models.default]
            api_key = "sk-file"
            model = "file-model"
            "#,
        );
        let env = EnvLayer::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-env".into()),
            "SUPERCODER_MODEL" => Some("env-model".into()),
            "SUPERCODER_ENDPOINT" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(env.endpoint, None, "blank values are ignored");

        let flags = FlagLayer {
            model: Some("flag-model".into()),
            temperature: Some(0.7),
            debug: true,
            ..Default::default()
        };
        let settings = Settings::resolve(files, &env, &flags).unwrap();
        assert_eq!(settings.api_key, "sk-env");
        assert_eq!(settings.model, "flag-model");
        assert_eq!(settings.temperature, 0.7);
        assert!(settings.debug);
    }

    #[test]
    fn profiles_switch_and_carry_style() {
        let files = parse(
            r#"
            [models.default]
            api_key = "sk-a"
            [models.oss]
            api_key = "sk-b"
            model = "openai/gpt-oss-20b"
            tool_calling_type = "qwen_like"
            request_timeout = 120
            "#,
        );
        let mut settings =
            Settings::resolve(files, &EnvLayer::default(), &FlagLayer::default()).unwrap();
        assert_eq!(settings.tool_calling_style, ToolCallingStyle::Supercoder);

        let profile = settings.switch_profile("oss").unwrap();
        assert_eq!(profile.model, "openai/gpt-oss-20b");
        assert_eq!(settings.active_profile, "oss");
        assert_eq!(settings.api_key, "sk-b");
        assert_eq!(settings.tool_calling_style, ToolCallingStyle::QwenLike);
        assert_eq!(settings.request_timeout, Duration::from_secs(120));

        assert!(matches!(
            settings.switch_profile("missing"),
            Err(CliConfigError::UnknownProfile(name)) if name == "missing"
        ));
    }

    #[test]
    fn unknown_profile_flag_is_an_error() {
        let flags = FlagLayer {
            profile: Some("nope".into()),
            ..Default::default()
        };
        let result = Settings::resolve(FileConfig::default(), &EnvLayer::default(), &flags);
        assert!(matches!(result, Err(CliConfigError::UnknownProfile(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_strategy = parse(r#"compression_strategy = "random""#);
        assert!(matches!(
            Settings::resolve(bad_strategy, &EnvLayer::default(), &FlagLayer::default()),
            Err(CliConfigError::Invalid(_))
        ));

        let bad_timeout = parse("request_timeout = -1.0");
        assert!(matches!(
            Settings::resolve(bad_timeout, &EnvLayer::default(), &FlagLayer::default()),
            Err(CliConfigError::Timeout(_))
        ));
    }

    #[test]
    fn reserve_larger_than_window_fails_validation() {
        let files = parse(
            r#"
            api_key = "sk-test-key"
            max_context_tokens = 1000
            reserved_for_response = 4096
            "#,
        );
        let settings = Settings::resolve(files, &EnvLayer::default(), &FlagLayer::default()).unwrap();
        assert!(matches!(settings.validate(), Err(CliConfigError::Invalid(_))));
    }

    #[test]
    fn agent_config_follows_settings() {
        let files = parse(
            r#"
            max_context_tokens = 16000
            compression_strategy = "sliding"
            [models.default]
            tool_calling_type = "xml_function"
            "#,
        );
        let settings = Settings::resolve(files, &EnvLayer::default(), &FlagLayer::default()).unwrap();
        let config = settings.agent_config(AgentMode::Ask, Some("Use tabs.".into()));
        assert_eq!(config.mode, AgentMode::Ask);
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.context.max_tokens, 16_000);
        assert_eq!(config.context.strategy, CompressionStrategy::Sliding);
        assert_eq!(config.tool_calling_style, ToolCallingStyle::XmlFunction);
        assert_eq!(config.project_rules.as_deref(), Some("Use tabs."));
        assert!(config.validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let tools = settings.build_tools(dir.path(), AbortSignal::new());
        assert_eq!(tools.len(), 5);
        assert!(tools.contains("command-exec"));
    }

    #[test]
    fn masks_api_key() {
        let mut settings =
            Settings::resolve(FileConfig::default(), &EnvLayer::default(), &FlagLayer::default())
                .unwrap();
        assert_eq!(settings.masked_api_key(), "Not Set");
        settings.api_key = "sk-1234567890abcd".into();
        assert_eq!(settings.masked_api_key(), "sk-1...abcd");
        settings.api_key = "short".into();
        assert_eq!(settings.masked_api_key(), "****");
    }

    #[test]
    fn read_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        assert!(FileConfig::read(&path).unwrap().is_none());

        fs::write(&path, "temperature = [").unwrap();
        assert!(matches!(FileConfig::read(&path), Err(CliConfigError::Parse { .. })));
    }

    #[test]
    fn template_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR_NAME).join(GLOBAL_CONFIG_FILE);
        assert!(ensure_template(&path).unwrap());
        fs::write(&path, "debug = true\n").unwrap();
        assert!(!ensure_template(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "debug = true\n");
    }
}
