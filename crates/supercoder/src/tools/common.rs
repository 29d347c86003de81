//! Built-in coding tools.
//!
//! Each tool is rooted at a working directory. Relative paths resolve
//! against it; absolute paths must stay inside it and `..` is rejected.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`FileRead`] | `file-read` | Read a file with line numbers |
//! | [`CodeSearch`] | `code-search` | `git grep` with a plain `grep` fallback |
//! | [`CodeEdit`] | `code-edit` | Create files and apply targeted edits |
//! | [`ProjectStructure`] | `project-structure` | Directory tree with noise filtered out |
//! | [`CommandExec`] | `command-exec` | Run a shell command with safety checks |

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::abort::AbortSignal;
use crate::error::ToolError;
use crate::tools::core::{Tool, ToolFuture};
use crate::tools::names;
use crate::tools::spec::{ToolDef, ToolSpec};

const SEPARATOR_WIDTH: usize = 50;

fn separator() -> String {
    "─".repeat(SEPARATOR_WIDTH)
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Accept `10`, `10.0` or `"10"` for numeric arguments; anything else is
/// treated as absent.
fn lenient_usize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Resolve a user-supplied path against `workdir`.
fn resolve_path(workdir: &Path, raw: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(raw.trim());
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ToolError::InvalidArguments(format!(
            "path traversal ('..') is not allowed: {raw}"
        )));
    }
    if candidate.is_absolute() {
        let root = workdir
            .canonicalize()
            .unwrap_or_else(|_| workdir.to_path_buf());
        if candidate.starts_with(&root) || candidate.starts_with(workdir) {
            Ok(candidate.to_path_buf())
        } else {
            Err(ToolError::InvalidArguments(format!(
                "path is outside the project directory: {raw}"
            )))
        }
    } else {
        Ok(workdir.join(candidate))
    }
}

fn io_error(action: &str, path: &str, e: std::io::Error) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::Execution(format!("File '{path}' not found"))
    } else {
        ToolError::Execution(format!("Error {action} '{path}': {e}"))
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text.get(..idx).unwrap_or(text),
        None => text,
    }
}

// ── FileRead ────────────────────────────────────────────────────────

/// Default number of lines returned when no `endLine` is given.
pub const DEFAULT_MAX_LINES: usize = 200;

#[derive(Deserialize, JsonSchema)]
pub struct FileReadArgs {
    /// File path relative to the project root.
    #[serde(rename = "fileName", alias = "filename", alias = "path", alias = "file")]
    pub file_name: String,
    /// First line to return (1-based, default 1).
    #[serde(rename = "startLine", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub start_line: Option<usize>,
    /// Last line to return (inclusive).
    #[serde(rename = "endLine", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub end_line: Option<usize>,
    /// Lines to return when `endLine` is absent (default 200).
    #[serde(rename = "maxLines", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub max_lines: Option<usize>,
}

/// Read a file with line numbers and an optional line range.
pub struct FileRead {
    workdir: PathBuf,
}

impl FileRead {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

/// Number `content` lines for display, honoring the requested range.
pub fn render_file_excerpt(name: &str, content: &str, args: &FileReadArgs) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let start = args.start_line.unwrap_or(1).max(1) - 1;
    let end = match args.end_line {
        Some(end) => end.min(total),
        None => (start + args.max_lines.unwrap_or(DEFAULT_MAX_LINES)).min(total),
    };

    let selected = if start < end {
        lines.get(start..end).unwrap_or_default()
    } else {
        &[]
    };
    let formatted: Vec<String> = selected
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4}: {line}", start + i + 1))
        .collect();

    let mut info = format!("Lines {}-{} of {}", start + 1, end, total);
    if end < total {
        info.push_str(" (use startLine/endLine to see more)");
    }

    format!(
        "File: {name}\n{info}\n{}\n{}",
        separator(),
        formatted.join("\n")
    )
}

impl Tool for FileRead {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::FILE_READ, "Read a file with line numbers")
            .when_to_use("When you need the contents of a file whose path you know")
            .when_not_to_use(
                "When looking for which file contains something, use code-search instead",
            )
            .parameters_for::<FileReadArgs>()
            .example(
                r#"{"fileName": "src/main.py", "startLine": 10, "endLine": 40}"#,
                "numbered lines 10-40",
            )
            .to_tool_def()
    }

    fn primary_argument(&self) -> Option<&'static str> {
        Some("fileName")
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: FileReadArgs = parse_args(&arguments)
                .map_err(|_| ToolError::InvalidArguments("fileName is required".into()))?;
            if args.file_name.trim().is_empty() {
                return Err(ToolError::InvalidArguments("fileName is required".into()));
            }
            let path = resolve_path(&self.workdir, &args.file_name)?;

            let meta = fs::metadata(&path)
                .await
                .map_err(|e| io_error("reading", &args.file_name, e))?;
            if meta.is_dir() {
                return Err(ToolError::Execution(format!(
                    "'{}' is a directory, not a file",
                    args.file_name
                )));
            }

            let bytes = fs::read(&path)
                .await
                .map_err(|e| io_error("reading", &args.file_name, e))?;
            let content = String::from_utf8_lossy(&bytes);
            Ok(render_file_excerpt(&args.file_name, &content, &args))
        })
    }
}

// ── CodeSearch ──────────────────────────────────────────────────────

pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Source globs searched by the `grep` fallback when no pattern is given.
const FALLBACK_INCLUDES: &[&str] = &[
    "*.py", "*.rs", "*.js", "*.ts", "*.tsx", "*.go", "*.java", "*.scala", "*.c", "*.h", "*.cpp",
    "*.rb", "*.md", "*.toml", "*.json", "*.yaml", "*.yml",
];

static MATCH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\n]+?:\d+:").expect("valid regex"));

#[derive(Deserialize, JsonSchema)]
pub struct CodeSearchArgs {
    /// Text or regex to search for.
    #[serde(alias = "pattern", alias = "search")]
    pub query: String,
    /// Approximate number of matches to show (default 10).
    #[serde(rename = "maxResults", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub max_results: Option<usize>,
    /// Restrict the search to files matching this glob (e.g. `*.py`).
    #[serde(rename = "filePattern", default)]
    pub file_pattern: Option<String>,
}

/// Search the project for a pattern.
pub struct CodeSearch {
    workdir: PathBuf,
}

impl CodeSearch {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// `git grep` with two lines of context. `None` when git is unavailable
    /// or the directory is not a repository.
    async fn git_grep(&self, query: &str, max: usize, file_pattern: Option<&str>) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.args(["grep", "-n", "-I", "--color=never", "-C", "2", "-e", query, "--"])
            .current_dir(&self.workdir)
            .stdin(Stdio::null());
        if let Some(pattern) = file_pattern {
            cmd.arg(pattern);
        }
        let output = cmd.output().await.ok()?;
        // 1 means "no matches".
        if !matches!(output.status.code(), Some(0 | 1)) {
            debug!(
                "git grep unavailable (status {:?}), falling back to grep",
                output.status.code()
            );
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
        let total = lines.iter().filter(|l| MATCH_LINE.is_match(l)).count();
        let header = format!(
            "Search: '{query}'\nFound {total} matches (showing ~{})",
            total.min(max)
        );
        if lines.is_empty() {
            return Some(format!("{header}\n\nNo matches found."));
        }
        let limited: Vec<&str> = lines.into_iter().take(max * 5).collect();
        Some(format!("{header}\n{}\n{}", separator(), limited.join("\n")))
    }

    async fn fallback_grep(
        &self,
        query: &str,
        max: usize,
        file_pattern: Option<&str>,
    ) -> Result<String, ToolError> {
        let mut cmd = Command::new("grep");
        cmd.args(["-rn", "-I", "--color=never"]);
        match file_pattern {
            Some(pattern) => {
                cmd.arg(format!("--include={pattern}"));
            }
            None => {
                for glob in FALLBACK_INCLUDES {
                    cmd.arg(format!("--include={glob}"));
                }
            }
        }
        let output = cmd
            .args(["-e", query, "."])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::Execution(format!("Error searching: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout
            .lines()
            .filter(|l| !l.is_empty())
            .take(max * 3)
            .collect();
        if lines.is_empty() {
            return Ok(format!("No matches found for '{query}'"));
        }
        Ok(format!(
            "Search: '{query}'\n{}\n{}",
            separator(),
            lines.join("\n")
        ))
    }
}

impl Tool for CodeSearch {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::CODE_SEARCH, "Search code in the project for a pattern")
            .when_to_use("When you need to find where something is defined or used")
            .when_not_to_use("When you already know the file, use file-read instead")
            .parameters_for::<CodeSearchArgs>()
            .example(
                r#"{"query": "def main", "filePattern": "*.py"}"#,
                "matching lines with file:line prefixes and context",
            )
            .to_tool_def()
    }

    fn primary_argument(&self) -> Option<&'static str> {
        Some("query")
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CodeSearchArgs = parse_args(&arguments)
                .map_err(|_| ToolError::InvalidArguments("query is required".into()))?;
            if args.query.is_empty() {
                return Err(ToolError::InvalidArguments("query is required".into()));
            }
            let max = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
            let pattern = args.file_pattern.as_deref().filter(|p| !p.trim().is_empty());

            if let Some(result) = self.git_grep(&args.query, max, pattern).await {
                return Ok(result);
            }
            self.fallback_grep(&args.query, max, pattern).await
        })
    }
}

// ── CodeEdit ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    #[default]
    SearchReplace,
    InsertAfter,
    InsertBefore,
    ReplaceLines,
    Append,
    Create,
}

#[derive(Deserialize, JsonSchema)]
pub struct CodeEditArgs {
    /// File to edit, relative to the project root.
    #[serde(alias = "fileName", alias = "filePath", alias = "path")]
    pub filepath: String,
    /// Edit to apply (default `search_replace`).
    #[serde(default)]
    pub operation: EditOperation,
    /// Exact text to replace (`search_replace`).
    #[serde(default)]
    pub search: Option<String>,
    /// Replacement text (`search_replace`).
    #[serde(default)]
    pub replace: Option<String>,
    /// Anchor text of the line to insert after (`insert_after`).
    #[serde(default)]
    pub after: Option<String>,
    /// Anchor text of the line to insert before (`insert_before`).
    #[serde(default)]
    pub before: Option<String>,
    /// New content (`create`, `append`, `insert_*`, `replace_lines`).
    #[serde(default)]
    pub content: Option<String>,
    /// First line to replace (`replace_lines`, 1-based).
    #[serde(rename = "startLine", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub start_line: Option<usize>,
    /// Last line to replace (`replace_lines`, inclusive).
    #[serde(rename = "endLine", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub end_line: Option<usize>,
}

/// Create files and apply targeted edits.
pub struct CodeEdit {
    workdir: PathBuf,
}

impl CodeEdit {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

fn execution(msg: impl Into<String>) -> ToolError {
    ToolError::Execution(msg.into())
}

async fn read_text(path: &Path, display: &str) -> Result<String, ToolError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| io_error("reading", display, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_text(path: &Path, display: &str, content: &str) -> Result<(), ToolError> {
    fs::write(path, content)
        .await
        .map_err(|e| io_error("writing", display, e))
}

fn join_lines(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Insert `content` relative to the first line containing `anchor`.
async fn insert_relative(
    path: &Path,
    display: &str,
    anchor: Option<&str>,
    content: &str,
    after: bool,
) -> Result<String, ToolError> {
    let label = if after { "after" } else { "before" };
    let anchor = anchor
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{label}' string is required")))?;

    let text = read_text(path, display).await?;
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let idx = lines
        .iter()
        .position(|l| l.contains(anchor))
        .ok_or_else(|| {
            execution(format!(
                "Line containing '{}' not found",
                truncate_chars(anchor, 50)
            ))
        })?;

    let new_lines: Vec<String> = content.lines().map(str::to_string).collect();
    let count = new_lines.len();
    let at = if after { idx + 1 } else { idx };
    lines.splice(at..at, new_lines);
    write_text(path, display, &join_lines(&lines)).await?;
    Ok(format!(
        "Inserted {count} line(s) {label} line {} in {display}",
        idx + 1
    ))
}

impl CodeEdit {
    async fn apply(&self, args: CodeEditArgs) -> Result<String, ToolError> {
        let display = args.filepath.trim().to_string();
        if display.is_empty() {
            return Err(ToolError::InvalidArguments("filepath is required".into()));
        }
        let path = resolve_path(&self.workdir, &display)?;
        let content = args.content.as_deref().unwrap_or_default();

        if args.operation != EditOperation::Create && fs::metadata(&path).await.is_err() {
            return Err(execution(format!("File '{display}' not found")));
        }

        match args.operation {
            EditOperation::SearchReplace => {
                let search = args
                    .search
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ToolError::InvalidArguments("search string is required".into())
                    })?;
                let replace = args.replace.as_deref().unwrap_or_default();
                let text = read_text(&path, &display).await?;

                if !text.contains(search) {
                    let first_line = search.lines().next().unwrap_or_default().trim();
                    let probe = truncate_chars(first_line, 20);
                    let similar: Vec<&str> = text
                        .lines()
                        .filter(|l| !probe.is_empty() && l.contains(probe))
                        .map(|l| truncate_chars(l.trim(), 60))
                        .take(3)
                        .collect();
                    let hint = if similar.is_empty() {
                        String::new()
                    } else {
                        format!("\nSimilar lines found:\n{}", similar.join("\n"))
                    };
                    return Err(execution(format!(
                        "Search string not found in {display}{hint}"
                    )));
                }

                let count = text.matches(search).count();
                write_text(&path, &display, &text.replace(search, replace)).await?;
                Ok(format!("Replaced {count} occurrence(s) in {display}"))
            }
            EditOperation::InsertAfter => {
                insert_relative(&path, &display, args.after.as_deref(), content, true).await
            }
            EditOperation::InsertBefore => {
                insert_relative(&path, &display, args.before.as_deref(), content, false).await
            }
            EditOperation::ReplaceLines => {
                let text = read_text(&path, &display).await?;
                let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
                let total = lines.len();
                let start = args.start_line.unwrap_or(1);
                let end = args.end_line.unwrap_or(1);
                if start < 1 || start > total {
                    return Err(execution(format!(
                        "startLine {start} out of range (1-{total})"
                    )));
                }
                if end < start || end > total {
                    return Err(execution(format!(
                        "endLine {end} invalid (must be {start}-{total})"
                    )));
                }
                let new_lines: Vec<String> = content.lines().map(str::to_string).collect();
                let count = new_lines.len();
                lines.splice(start - 1..end, new_lines);
                write_text(&path, &display, &join_lines(&lines)).await?;
                Ok(format!(
                    "Replaced lines {start}-{end} with {count} line(s) in {display}"
                ))
            }
            EditOperation::Append => {
                let mut text = read_text(&path, &display).await?;
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(content);
                text.push('\n');
                write_text(&path, &display, &text).await?;
                Ok(format!("Appended to {display}"))
            }
            EditOperation::Create => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|e| execution(format!("Error creating file: {e}")))?;
                }
                fs::write(&path, content)
                    .await
                    .map_err(|e| execution(format!("Error creating file: {e}")))?;
                Ok(format!("Created file: {display}"))
            }
        }
    }
}

impl Tool for CodeEdit {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(
            names::CODE_EDIT,
            "Create a file or edit one with search_replace, insert_after, insert_before, \
             replace_lines or append",
        )
        .when_to_use("When you need to change or create a file")
        .when_not_to_use("When you only need to look at a file, use file-read instead")
        .parameters_for::<CodeEditArgs>()
        .example(
            r#"{"filepath": "app.py", "operation": "search_replace", "search": "old", "replace": "new"}"#,
            "replaces every occurrence",
        )
        .example(
            r#"{"filepath": "app.py", "operation": "create", "content": "print('hello')"}"#,
            "writes a new file",
        )
        .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CodeEditArgs = parse_args(&arguments)?;
            self.apply(args).await
        })
    }
}

// ── ProjectStructure ────────────────────────────────────────────────

/// Directory names never descended into.
pub const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "build",
    "dist",
    ".idea",
    ".vscode",
    ".pytest_cache",
    "egg-info",
    ".eggs",
    ".mypy_cache",
    ".ruff_cache",
];

/// File suffixes never listed.
pub const IGNORE_SUFFIXES: &[&str] = &[".pyc", ".pyo", ".so", ".dylib", ".class", ".DS_Store"];

#[derive(Deserialize, JsonSchema)]
pub struct ProjectStructureArgs {
    /// Directory to show, relative to the project root (default `.`).
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum depth to descend (default 3).
    #[serde(rename = "maxDepth", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub max_depth: Option<usize>,
    /// Maximum number of files to list (default 50).
    #[serde(rename = "maxFiles", default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub max_files: Option<usize>,
}

/// Show the project directory tree.
pub struct ProjectStructure {
    workdir: PathBuf,
}

impl ProjectStructure {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[derive(Default)]
struct TreeCounter {
    files: usize,
    dirs: usize,
}

fn is_ignored(name: &str) -> bool {
    if IGNORE_DIRS.contains(&name) || name.ends_with(".egg-info") {
        return true;
    }
    if IGNORE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return true;
    }
    name.starts_with('.') && name != ".env.example"
}

fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{size}B")
    } else if size < 1024 * 1024 {
        format!("{}KB", size / 1024)
    } else {
        format!("{}MB", size / (1024 * 1024))
    }
}

fn build_tree(
    dir: &Path,
    out: &mut Vec<String>,
    depth: usize,
    max_depth: usize,
    max_files: usize,
    counter: &mut TreeCounter,
) {
    if depth >= max_depth || counter.files >= max_files {
        return;
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };

    let mut entries: Vec<(bool, String, PathBuf)> = read_dir
        .filter_map(Result::ok)
        .map(|e| {
            let is_dir = e.file_type().is_ok_and(|t| t.is_dir());
            (is_dir, e.file_name().to_string_lossy().into_owned(), e.path())
        })
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));

    let indent = "  ".repeat(depth);
    for (is_dir, name, path) in entries {
        if is_ignored(&name) {
            continue;
        }
        if is_dir {
            out.push(format!("{indent}{name}/"));
            counter.dirs += 1;
            build_tree(&path, out, depth + 1, max_depth, max_files, counter);
        } else if counter.files < max_files {
            let size = std::fs::metadata(&path).map_or(0, |m| m.len());
            out.push(format!("{indent}{name} ({})", format_size(size)));
            counter.files += 1;
        }
    }
}

impl Tool for ProjectStructure {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::PROJECT_STRUCTURE, "Show the project directory structure")
            .when_to_use("When you need an overview of the files in the project")
            .when_not_to_use("When searching for text, use code-search instead")
            .parameters_for::<ProjectStructureArgs>()
            .example(r#"{"path": "src", "maxDepth": 2}"#, "indented tree of src/")
            .to_tool_def()
    }

    fn primary_argument(&self) -> Option<&'static str> {
        Some("path")
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ProjectStructureArgs = parse_args(&arguments)?;
            let display = args.path.clone().unwrap_or_else(|| ".".to_string());
            let root = resolve_path(&self.workdir, &display)?;
            if fs::metadata(&root).await.is_err() {
                return Err(execution(format!("Path '{display}' not found")));
            }
            let max_depth = args.max_depth.unwrap_or(3);
            let max_files = args.max_files.unwrap_or(50);

            tokio::task::spawn_blocking(move || {
                let mut out = vec!["Project Structure:".to_string()];
                let mut counter = TreeCounter::default();
                build_tree(&root, &mut out, 0, max_depth, max_files, &mut counter);
                out.push(format!(
                    "\nTotal: {} directories, {} files shown",
                    counter.dirs, counter.files
                ));
                out.join("\n")
            })
            .await
            .map_err(|e| execution(format!("Error walking directory: {e}")))
        })
    }
}

// ── CommandExec ─────────────────────────────────────────────────────

/// Substrings that block a command outright (matched lowercased).
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "> /dev/",
    "mkfs",
    "dd if=",
    ":(){:|:&};:",
    "chmod -R 777 /",
    "curl | sh",
    "wget | sh",
];

/// Substrings that are allowed but flagged in the result.
pub const WARN_PATTERNS: &[&str] = &["rm ", "sudo ", "chmod ", "chown ", "mv /", "cp /"];

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 120;
/// Silence longer than this adds a "may be waiting for input" notice.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_OUTPUT_CHARS: usize = 30_000;
const PARTIAL_OUTPUT_CHARS: usize = 2_000;

#[derive(Deserialize, JsonSchema)]
pub struct CommandExecArgs {
    /// Shell command to run in the project root.
    #[serde(alias = "cmd")]
    pub command: String,
    /// Timeout in seconds (default 60, max 120).
    #[serde(default, deserialize_with = "lenient_usize")]
    #[schemars(with = "Option<u64>")]
    pub timeout: Option<usize>,
}

/// Run a shell command with stdin closed and stderr merged into stdout.
pub struct CommandExec {
    workdir: PathBuf,
    abort: AbortSignal,
}

enum Exit {
    Finished(Option<i32>),
    TimedOut,
    Aborted,
}

/// First blocked pattern contained in `command`, if any.
pub fn blocked_pattern(command: &str) -> Option<&'static str> {
    let lower = command.to_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .copied()
        .find(|p| lower.contains(&p.to_lowercase()))
}

fn warnings_for(command: &str) -> Vec<String> {
    let lower = command.to_lowercase();
    WARN_PATTERNS
        .iter()
        .filter(|p| lower.contains(*p))
        .map(|p| format!("Caution: command contains '{}'", p.trim()))
        .collect()
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

impl CommandExec {
    pub fn new(workdir: impl Into<PathBuf>, abort: AbortSignal) -> Self {
        Self {
            workdir: workdir.into(),
            abort,
        }
    }

    async fn kill_tree(child: &mut tokio::process::Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .arg("-KILL")
                .arg(format!("-{pid}"))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
        let _ = child.start_kill();
        let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<(Exit, String, Option<String>), ToolError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| execution(format!("Error executing command: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let start = tokio::time::Instant::now();
        let mut last_output = start;
        let mut output = String::new();
        let mut stall_notice = None;
        let mut pipes_open = true;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                line = rx.recv(), if pipes_open => match line {
                    Some(line) => {
                        output.push_str(&line);
                        last_output = tokio::time::Instant::now();
                    }
                    None => pipes_open = false,
                },
                _ = ticker.tick() => {
                    if let Ok(Some(status)) = child.try_wait() {
                        break Exit::Finished(Some(status.code().unwrap_or(-1)));
                    }
                    if self.abort.is_aborted() {
                        debug!("Aborting command: {command}");
                        Self::kill_tree(&mut child).await;
                        break Exit::Aborted;
                    }
                    if start.elapsed() >= timeout {
                        debug!("Command timed out after {:?}: {command}", timeout);
                        Self::kill_tree(&mut child).await;
                        break Exit::TimedOut;
                    }
                    let silent = last_output.elapsed();
                    if stall_notice.is_none() && silent >= STALL_THRESHOLD {
                        stall_notice = Some(format!(
                            "Process stalled for {}s (may be waiting for input)",
                            silent.as_secs()
                        ));
                    }
                }
            }
        };

        // Collect whatever the readers still hold.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while let Ok(Some(line)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            output.push_str(&line);
        }

        Ok((exit, output, stall_notice))
    }
}

fn format_finished(code: i32, output: &str) -> String {
    let output = output.trim_end();
    if output.is_empty() {
        return format!("Exit code: {code}\n(no output)");
    }
    let total = output.chars().count();
    if total > MAX_OUTPUT_CHARS {
        format!(
            "Exit code: {code}\n\n{}\n... (truncated, {total} total chars)",
            truncate_chars(output, MAX_OUTPUT_CHARS)
        )
    } else {
        format!("Exit code: {code}\n\n{output}")
    }
}

fn format_partial(headline: String, output: &str) -> String {
    let mut parts = vec![headline];
    let output = output.trim_end();
    if !output.is_empty() {
        parts.push(format!(
            "\nPartial output:\n{}",
            truncate_chars(output, PARTIAL_OUTPUT_CHARS)
        ));
    }
    parts.join("\n")
}

impl Tool for CommandExec {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::COMMAND_EXEC, "Execute a shell command in the project root")
            .when_to_use("When you need to run tests, build the project, or use git")
            .when_not_to_use(
                "When a dedicated tool exists: file-read to read, code-search to search, \
                 code-edit to change files",
            )
            .parameters_for::<CommandExecArgs>()
            .example(r#"{"command": "ls -la", "timeout": 30}"#, "exit code and output")
            .to_tool_def()
    }

    fn primary_argument(&self) -> Option<&'static str> {
        Some("command")
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CommandExecArgs = parse_args(&arguments)
                .map_err(|_| ToolError::InvalidArguments("command is required".into()))?;
            let command = args.command.trim().to_string();
            if command.is_empty() {
                return Err(ToolError::InvalidArguments("command is required".into()));
            }
            if let Some(pattern) = blocked_pattern(&command) {
                return Err(execution(format!(
                    "Blocked dangerous command: {command}\nThis pattern is not allowed: {pattern}"
                )));
            }

            let secs = args
                .timeout
                .map_or(DEFAULT_COMMAND_TIMEOUT_SECS, |t| t as u64)
                .clamp(1, MAX_COMMAND_TIMEOUT_SECS);

            let (exit, output, stall) = self.run(&command, Duration::from_secs(secs)).await?;

            let outcome = match exit {
                Exit::Finished(code) => format_finished(code.unwrap_or(-1), &output),
                Exit::TimedOut => format!(
                    "{}\n\nTip: stdin is isolated - if the command needs input, pipe it: echo 'input' | command",
                    format_partial(format!("Command timed out after {secs}s: {command}"), &output)
                ),
                Exit::Aborted => format_partial(format!("Command aborted: {command}"), &output),
            };

            let mut sections = warnings_for(&command);
            sections.push(format!("$ {command}"));
            sections.push(outcome);
            let body = sections.join("\n");

            Ok(match stall {
                Some(notice) => format!("{notice}\n\n{body}"),
                None => body,
            })
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "import os\n\ndef main():\n    print('hello')\n\nmain()\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn file_read_numbers_lines() {
        let dir = workspace();
        let out = FileRead::new(dir.path())
            .execute(r#"{"fileName": "main.py"}"#)
            .await
            .unwrap();
        assert!(out.starts_with("File: main.py\nLines 1-6 of 6"));
        assert!(out.contains("   3: def main():"));
    }

    #[tokio::test]
    async fn file_read_range_and_hint() {
        let dir = workspace();
        let out = FileRead::new(dir.path())
            .execute(r#"{"fileName": "main.py", "startLine": "2", "endLine": 3}"#)
            .await
            .unwrap();
        assert!(out.contains("Lines 2-3 of 6 (use startLine/endLine to see more)"));
        assert!(out.contains("   3: def main():"));
        assert!(!out.contains("   4:"));
    }

    #[tokio::test]
    async fn file_read_errors() {
        let dir = workspace();
        let tool = FileRead::new(dir.path());
        let missing = tool.execute(r#"{"fileName": "nope.py"}"#).await.unwrap_err();
        assert_eq!(missing.to_string(), "File 'nope.py' not found");

        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        let is_dir = tool.execute(r#"{"fileName": "pkg"}"#).await.unwrap_err();
        assert!(is_dir.to_string().contains("is a directory"));

        let traversal = tool.execute(r#"{"fileName": "../etc/passwd"}"#).await.unwrap_err();
        assert!(matches!(traversal, ToolError::InvalidArguments(_)));

        assert!(tool.execute("{}").await.is_err());
    }

    #[tokio::test]
    async fn code_search_finds_matches() {
        let dir = workspace();
        let out = CodeSearch::new(dir.path())
            .execute(r#"{"query": "def main"}"#)
            .await
            .unwrap();
        assert!(out.contains("main.py"), "unexpected output: {out}");
        assert!(out.contains("def main"));
    }

    #[tokio::test]
    async fn code_search_reports_no_matches() {
        let dir = workspace();
        let out = CodeSearch::new(dir.path())
            .execute(r#"{"query": "zzz_not_present_zzz"}"#)
            .await
            .unwrap();
        assert!(out.contains("No matches found"));
    }

    #[tokio::test]
    async fn code_edit_create_and_search_replace() {
        let dir = workspace();
        let tool = CodeEdit::new(dir.path());
        let created = tool
            .execute(r#"{"filepath": "pkg/app.py", "operation": "create", "content": "x = 1\nx = 2\n"}"#)
            .await
            .unwrap();
        assert_eq!(created, "Created file: pkg/app.py");

        let replaced = tool
            .execute(r#"{"filepath": "pkg/app.py", "search": "x =", "replace": "y ="}"#)
            .await
            .unwrap();
        assert_eq!(replaced, "Replaced 2 occurrence(s) in pkg/app.py");
        let text = std::fs::read_to_string(dir.path().join("pkg/app.py")).unwrap();
        assert_eq!(text, "y = 1\ny = 2\n");
    }

    #[tokio::test]
    async fn code_edit_search_miss_suggests_similar_lines() {
        let dir = workspace();
        let err = CodeEdit::new(dir.path())
            .execute(r#"{"filepath": "main.py", "search": "def main():\n    print('bye')"}"#)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Search string not found in main.py"));
        assert!(msg.contains("Similar lines found:\ndef main():"));
    }

    #[tokio::test]
    async fn code_edit_line_operations() {
        let dir = workspace();
        let tool = CodeEdit::new(dir.path());

        let after = tool
            .execute(r#"{"filepath": "main.py", "operation": "insert_after", "after": "import os", "content": "import sys"}"#)
            .await
            .unwrap();
        assert_eq!(after, "Inserted 1 line(s) after line 1 in main.py");

        let before = tool
            .execute(r##"{"filepath": "main.py", "operation": "insert_before", "before": "import os", "content": "# header"}"##)
            .await
            .unwrap();
        assert_eq!(before, "Inserted 1 line(s) before line 1 in main.py");

        let replaced = tool
            .execute(r##"{"filepath": "main.py", "operation": "replace_lines", "startLine": 1, "endLine": 1, "content": "# new header"}"##)
            .await
            .unwrap();
        assert!(replaced.starts_with("Replaced lines 1-1 with 1 line(s)"));

        tool.execute(r##"{"filepath": "main.py", "operation": "append", "content": "# end"}"##)
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("main.py")).unwrap();
        assert!(text.starts_with("# new header\nimport os\nimport sys\n"));
        assert!(text.ends_with("main()\n# end\n"));

        let bad = tool
            .execute(r#"{"filepath": "main.py", "operation": "replace_lines", "startLine": 50, "endLine": 60}"#)
            .await
            .unwrap_err();
        assert!(bad.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn code_edit_rejects_unknown_operation_and_missing_file() {
        let dir = workspace();
        let tool = CodeEdit::new(dir.path());
        assert!(matches!(
            tool.execute(r#"{"filepath": "main.py", "operation": "explode"}"#)
                .await
                .unwrap_err(),
            ToolError::InvalidArguments(_)
        ));
        let missing = tool
            .execute(r#"{"filepath": "ghost.py", "search": "a", "replace": "b"}"#)
            .await
            .unwrap_err();
        assert_eq!(missing.to_string(), "File 'ghost.py' not found");
    }

    #[tokio::test]
    async fn project_structure_filters_noise() {
        let dir = workspace();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/cache.pyc"), "").unwrap();
        std::fs::write(root.join(".env"), "").unwrap();
        std::fs::write(root.join(".env.example"), "").unwrap();

        let out = ProjectStructure::new(root).execute("{}").await.unwrap();
        assert!(out.starts_with("Project Structure:"));
        assert!(out.contains("src/"));
        assert!(out.contains("  lib.rs (0B)"));
        assert!(out.contains(".env.example"));
        assert!(!out.contains("node_modules"));
        assert!(!out.contains(".git"));
        assert!(!out.contains("cache.pyc"));
        assert!(!out.contains(".env ("));
        assert!(out.contains("Total: 2 directories, 3 files shown"));
    }

    #[tokio::test]
    async fn project_structure_respects_limits() {
        let dir = workspace();
        std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        std::fs::write(dir.path().join("a/b/c/deep.txt"), "x").unwrap();
        let out = ProjectStructure::new(dir.path())
            .execute(r#"{"maxDepth": 2, "maxFiles": 1}"#)
            .await
            .unwrap();
        assert!(!out.contains("deep.txt"));
        assert!(out.contains("1 files shown"));
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3MB");
    }

    #[test]
    fn dangerous_commands_are_detected() {
        assert_eq!(blocked_pattern("sudo rm -rf / --no-preserve-root"), Some("rm -rf /"));
        assert_eq!(blocked_pattern("DD IF=/dev/zero of=disk"), Some("dd if="));
        assert_eq!(blocked_pattern("ls -la"), None);
        assert_eq!(
            warnings_for("sudo chown me file"),
            vec![
                "Caution: command contains 'sudo'".to_string(),
                "Caution: command contains 'chown'".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn command_exec_reports_exit_code_and_output() {
        let dir = workspace();
        let tool = CommandExec::new(dir.path(), AbortSignal::new());
        let out = tool
            .execute(r#"{"command": "echo out; echo err 1>&2; exit 3"}"#)
            .await
            .unwrap();
        assert!(out.starts_with("$ echo out"));
        assert!(out.contains("Exit code: 3\n\n"));
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn command_exec_without_output() {
        let dir = workspace();
        let out = CommandExec::new(dir.path(), AbortSignal::new())
            .execute(r#"{"command": "true"}"#)
            .await
            .unwrap();
        assert!(out.ends_with("Exit code: 0\n(no output)"));
    }

    #[tokio::test]
    async fn command_exec_blocks_dangerous_commands() {
        let dir = workspace();
        let err = CommandExec::new(dir.path(), AbortSignal::new())
            .execute(r#"{"command": "rm -rf /"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Blocked dangerous command"));
    }

    #[tokio::test]
    async fn command_exec_times_out() {
        let dir = workspace();
        let out = CommandExec::new(dir.path(), AbortSignal::new())
            .execute(r#"{"command": "echo started; sleep 10", "timeout": 1}"#)
            .await
            .unwrap();
        assert!(out.contains("Command timed out after 1s"));
        assert!(out.contains("started"));
    }

    #[tokio::test]
    async fn command_exec_honors_abort() {
        let dir = workspace();
        let abort = AbortSignal::new();
        let tool = CommandExec::new(dir.path(), abort.clone());
        let remote = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            remote.abort();
        });
        let started = std::time::Instant::now();
        let out = tool.execute(r#"{"command": "sleep 20"}"#).await.unwrap();
        assert!(out.contains("Command aborted"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn plain_text_arguments_reach_the_primary_field() {
        let dir = workspace();
        let registry = crate::tools::core::ToolRegistry::new()
            .with_builtin_tools(dir.path(), AbortSignal::new());
        let out = registry.execute("file-read", "main.py").await.unwrap();
        assert!(out.starts_with("File: main.py"));
    }
}
