//! Tool abstraction and the registry that dispatches parsed calls.
//!
//! The [`Tool`] trait defines the interface every tool implements: a static
//! definition (name, description, JSON schema) and an async `execute`
//! method. Tools are collected into a [`ToolRegistry`] which handles name
//! resolution, argument normalization, timeouts, panic isolation and result
//! truncation.

use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::abort::AbortSignal;
use crate::error::ToolError;
use crate::parser::{ToolArguments, ToolCall};
use crate::tools::names;
use crate::tools::spec::ToolDef;

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for one tool execution. Longer than the command tool's
/// own 120 s ceiling so that its partial-output report wins.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(180);

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke.
///
/// ```ignore
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("echo", "Repeat the input", json_schema_for::<EchoArgs>())
///     }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let arguments = arguments.to_string();
///         Box::pin(async move { Ok(arguments) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Execute with a JSON-encoded arguments object.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }

    /// Parameter that receives plain-text arguments.
    ///
    /// When the model passes a bare string (`<tool name="code-search">main</tool>`)
    /// the registry wraps it as `{primary: text}`.
    fn primary_argument(&self) -> Option<&'static str> {
        None
    }

    /// Whether this tool changes the filesystem or runs processes.
    fn is_mutation(&self) -> bool {
        false
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Tools addressable by name.
///
/// ```ignore
/// let registry = ToolRegistry::new()
///     .with_builtin_tools(".", abort.clone())
///     .with(MyTool::new());
///
/// let result = registry.execute("file-read", r#"{"fileName": "main.rs"}"#).await;
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    /// When set, only these canonical names resolve.
    allowed: Option<HashSet<String>>,
    max_result_bytes: usize,
    validate_args: bool,
    timeout: Option<Duration>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .field("allowed", &self.allowed)
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            allowed: None,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Validate arguments against each tool's JSON Schema before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// `None` disables the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if self.tools.insert(name.clone(), Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register the five built-in coding tools rooted at `workdir`.
    pub fn with_builtin_tools(self, workdir: impl Into<PathBuf>, abort: AbortSignal) -> Self {
        use crate::tools::common::{CodeEdit, CodeSearch, CommandExec, FileRead, ProjectStructure};
        let workdir = workdir.into();
        self.with(FileRead::new(workdir.clone()))
            .with(CodeSearch::new(workdir.clone()))
            .with(CodeEdit::new(workdir.clone()))
            .with(ProjectStructure::new(workdir.clone()))
            .with(CommandExec::new(workdir, abort))
    }

    /// Restrict resolution to `names` (e.g. read-only mode). `None` lifts
    /// the restriction.
    pub fn set_allowed<I, S>(&mut self, names: Option<I>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed =
            names.map(|it| it.into_iter().map(|n| n.as_ref().to_string()).collect());
    }

    /// Hide every tool whose [`Tool::is_mutation`] is true. `false` shows
    /// all registered tools again.
    pub fn set_read_only(&mut self, read_only: bool) {
        let view = read_only.then(|| {
            self.order
                .iter()
                .filter(|n| self.tools.get(n.as_str()).is_some_and(|t| !t.is_mutation()))
                .cloned()
                .collect::<Vec<_>>()
        });
        self.set_allowed(view);
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed.as_ref().is_none_or(|set| set.contains(name))
    }

    /// Canonical registered name for `name`.
    ///
    /// Tries an exact match, then the case/underscore-folded form, then the
    /// alias table.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let normalized = names::normalize(name);
        let alias = names::resolve_alias(name);
        let found = self
            .order
            .iter()
            .find(|n| n.as_str() == name)
            .or_else(|| self.order.iter().find(|n| names::normalize(n) == normalized))
            .or_else(|| self.order.iter().find(|n| n.as_str() == alias))?;
        self.is_allowed(found).then_some(found.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Available tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| self.is_allowed(n))
            .map(String::as_str)
            .collect()
    }

    /// Definitions of available tools in registration order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.names()
            .into_iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute a parsed call.
    pub async fn execute_call(&self, call: &ToolCall) -> Result<String, ToolError> {
        let arguments = match &call.arguments {
            ToolArguments::Structured(_) => call.arguments.to_json_string(),
            ToolArguments::Raw(raw) => raw.clone(),
        };
        self.execute(&call.name, &arguments).await
    }

    /// Execute a tool by name with validation, timing, timeout, panic
    /// isolation and truncation.
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let canonical = self
            .resolve(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let tool = self
            .tools
            .get(canonical)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = normalize_arguments(tool.as_ref(), arguments);

        if self.validate_args {
            validate_tool_arguments(tool.as_ref(), &arguments)?;
        }

        log_tool_call(canonical, &arguments);
        let start = Instant::now();

        let guarded = AssertUnwindSafe(tool.execute(&arguments)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {canonical} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64(),
                    );
                    return Err(ToolError::TimedOut {
                        name: canonical.to_string(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => guarded.await,
        };

        let result = match outcome {
            Ok(r) => r?,
            Err(_) => {
                warn!("Tool {canonical} panicked");
                return Err(ToolError::Panicked(canonical.to_string()));
            }
        };

        debug!(
            "Tool {canonical} completed in {:.0}ms ({} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        trace!(
            "Tool {canonical} result preview: {}",
            result.chars().take(300).collect::<String>()
        );

        Ok(truncate_result(result, self.max_result_bytes))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Coerce whatever the model sent into a JSON object string.
///
/// - empty input or `""` becomes `{}`
/// - a double-encoded JSON string is decoded once
/// - plain text is wrapped as `{primary: text}` when the tool declares a
///   primary argument
pub fn normalize_arguments(tool: &dyn Tool, arguments: &str) -> String {
    let trimmed = arguments.trim();
    if trimmed.is_empty() || trimmed == "\"\"" {
        return "{}".to_string();
    }

    let text = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(_)) => return trimmed.to_string(),
        Ok(serde_json::Value::String(inner)) => {
            if matches!(
                serde_json::from_str::<serde_json::Value>(&inner),
                Ok(serde_json::Value::Object(_))
            ) {
                return inner;
            }
            inner
        }
        _ => trimmed.to_string(),
    };

    match tool.primary_argument() {
        Some(key) => serde_json::json!({ key: text }).to_string(),
        None => text,
    }
}

/// Validate arguments against the tool's declared JSON Schema.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Result<(), ToolError> {
    let args_value: serde_json::Value = serde_json::from_str(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("not valid JSON: {e}")))?;

    let schema = tool.definition().parameters;
    // An invalid schema skips validation.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "argument validation failed for tool '{}':\n{}",
            tool.name(),
            errors.join("\n")
        )))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..cut).unwrap_or_default(),
        s.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::{ToolSpec, json_schema_for};
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    struct Echo;

    impl Tool for Echo {
        fn definition(&self) -> ToolDef {
            ToolSpec::builder("echo-text", "Repeat the input")
                .parameters_for::<EchoArgs>()
                .to_tool_def()
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let arguments = arguments.to_string();
            Box::pin(async move {
                let args: EchoArgs = serde_json::from_str(&arguments)
                    .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                Ok(args.text)
            })
        }

        fn primary_argument(&self) -> Option<&'static str> {
            Some("text")
        }
    }

    struct Sleepy;

    impl Tool for Sleepy {
        fn definition(&self) -> ToolDef {
            ToolDef::new("sleepy", "Sleeps", json_schema_for::<EchoArgs>())
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("late".into())
            })
        }
    }

    struct Panicky;

    fn explode() -> Result<String, ToolError> {
        panic!("boom")
    }

    impl Tool for Panicky {
        fn definition(&self) -> ToolDef {
            ToolDef::new("panicky", "Panics", serde_json::json!({}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async { explode() })
        }
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let registry = ToolRegistry::new().with(Echo);
        let out = registry
            .execute("echo-text", r#"{"text": "hi"}"#)
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new().with(Echo);
        let err = registry.execute("nope", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "nope"));
    }

    #[tokio::test]
    async fn resolves_case_and_underscore_variants() {
        let registry = ToolRegistry::new().with(Echo);
        assert_eq!(registry.resolve("Echo_Text"), Some("echo-text"));
        let out = registry.execute("ECHO_TEXT", r#"{"text": "x"}"#).await.unwrap();
        assert_eq!(out, "x");
    }

    #[test]
    fn resolves_aliases_for_builtins() {
        let registry = ToolRegistry::new().with_builtin_tools(".", AbortSignal::new());
        assert_eq!(registry.resolve("read"), Some(names::FILE_READ));
        assert_eq!(registry.resolve("create"), Some(names::CODE_EDIT));
        assert_eq!(registry.resolve("code_search"), Some(names::CODE_SEARCH));
        assert_eq!(registry.names(), names::ALL.to_vec());
    }

    #[test]
    fn allow_list_hides_tools() {
        let mut registry = ToolRegistry::new().with_builtin_tools(".", AbortSignal::new());
        registry.set_allowed(Some([names::FILE_READ]));
        assert!(registry.resolve("code-edit").is_none());
        assert_eq!(registry.names(), vec![names::FILE_READ]);

        registry.set_allowed(None::<Vec<&str>>);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn read_only_view_follows_mutation_flag() {
        let mut registry = ToolRegistry::new()
            .with_builtin_tools(".", AbortSignal::new())
            .with(Echo);
        registry.set_read_only(true);
        assert_eq!(
            registry.names(),
            vec![names::FILE_READ, names::CODE_SEARCH, names::PROJECT_STRUCTURE, "echo-text"]
        );
        assert!(registry.resolve("command-exec").is_none());

        registry.set_read_only(false);
        assert_eq!(registry.len(), 6);
    }

    #[tokio::test]
    async fn plain_text_goes_to_primary_argument() {
        let registry = ToolRegistry::new().with(Echo);
        let out = registry.execute("echo-text", "hello there").await.unwrap();
        assert_eq!(out, "hello there");
    }

    #[tokio::test]
    async fn double_encoded_arguments_are_decoded() {
        let registry = ToolRegistry::new().with(Echo);
        let out = registry
            .execute("echo-text", r#""{\"text\": \"inner\"}""#)
            .await
            .unwrap();
        assert_eq!(out, "inner");
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(normalize_arguments(&Echo, ""), "{}");
        assert_eq!(normalize_arguments(&Echo, "\"\""), "{}");
        assert_eq!(normalize_arguments(&Panicky, "raw words"), "raw words");
    }

    #[tokio::test]
    async fn validation_rejects_missing_fields() {
        let registry = ToolRegistry::new().with(Echo).with_arg_validation(true);
        let err = registry.execute("echo-text", r#"{"other": 1}"#).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let registry = ToolRegistry::new()
            .with(Sleepy)
            .with_timeout(Some(Duration::from_millis(20)));
        let err = registry.execute("sleepy", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let registry = ToolRegistry::new().with(Panicky);
        let err = registry.execute("panicky", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::Panicked(ref n) if n == "panicky"));
    }

    #[tokio::test]
    async fn long_results_are_truncated() {
        let registry = ToolRegistry::new().with(Echo).with_max_result_bytes(5);
        let out = registry
            .execute("echo-text", r#"{"text": "abcdefghij"}"#)
            .await
            .unwrap();
        assert!(out.starts_with("abcde..."));
        assert!(out.contains("[truncated: 10 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_result("ééé".to_string(), 3);
        assert!(out.starts_with("é..."));
    }
}
