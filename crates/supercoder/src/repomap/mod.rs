//! Compact outline of the project's definitions for the system prompt.
//!
//! [`RepoMap`] walks the project (skipping hidden and build directories,
//! capped at [`DEFAULT_MAX_FILES`] source files), extracts class and
//! function names per file with [`tags::extract_tags`], and renders them
//! as an indented listing cut off at a token limit:
//!
//! ```text
//! src/agent.py:
//!   CoderAgent class
//!   chat_stream function
//! ```
//!
//! Each render is also written to `.supercoder/repomap/repo_map.txt`.

pub mod tags;

pub use tags::{Tag, TagKind, extract_tags};

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::context::estimate_tokens;
use crate::tools::common::IGNORE_DIRS;

/// Source files scanned per render.
pub const DEFAULT_MAX_FILES: usize = 50;

/// Token limit of the map embedded in the system prompt.
pub const PROMPT_MAP_TOKENS: usize = 2000;

/// Heading placed above the map in the system prompt.
pub const REPO_MAP_HEADER: &str = "# Repository Structure";

/// Where the last render is persisted, relative to the project root.
pub const REPO_MAP_FILE: &str = ".supercoder/repomap/repo_map.txt";

#[derive(Debug, Clone)]
pub struct RepoMap {
    root: PathBuf,
    max_files: usize,
}

impl RepoMap {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source files in sorted walk order, at most `max_files`.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_sources(&self.root, self.max_files, &mut files);
        files
    }

    /// Render the map under `max_tokens` without touching the disk.
    pub fn render(&self, max_tokens: usize) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut used = 0;
        for file in self.source_files() {
            let Ok(content) = fs::read_to_string(&file) else {
                debug!("Repo map skipped unreadable {}", file.display());
                continue;
            };
            let tags = extract_tags(&file, &content);
            if tags.is_empty() {
                continue;
            }
            let rel = file.strip_prefix(&self.root).unwrap_or(&file);
            out.push(format!("{}:", rel.display()));
            for tag in tags {
                let line = format!("  {} {}", tag.name, tag.kind);
                used += estimate_tokens(&line);
                out.push(line);
                if used > max_tokens {
                    out.push("  ...".to_string());
                    return out.join("\n");
                }
            }
        }
        out.join("\n")
    }

    /// Render and persist. A failed write is logged; the map is still returned.
    pub fn generate(&self, max_tokens: usize) -> String {
        let map = self.render(max_tokens);
        let path = self.root.join(REPO_MAP_FILE);
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, &map));
        if let Err(e) = written {
            warn!("Failed to write repo map to {}: {e}", path.display());
        }
        debug!("Repo map generated: {} chars", map.len());
        map
    }
}

fn skip_dir(name: &str) -> bool {
    name.starts_with('.') || IGNORE_DIRS.contains(&name)
}

fn collect_sources(dir: &Path, max_files: usize, out: &mut Vec<PathBuf>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<(String, PathBuf, bool)> = read_dir
        .filter_map(Result::ok)
        .map(|e| {
            let is_dir = e.file_type().is_ok_and(|t| t.is_dir());
            (e.file_name().to_string_lossy().into_owned(), e.path(), is_dir)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, path, is_dir) in entries {
        if out.len() >= max_files {
            return;
        }
        if is_dir {
            if !skip_dir(&name) {
                collect_sources(&path, max_files, out);
            }
        } else if tags::is_source_file(&path) {
            out.push(path);
        }
    }
}
