//! Project rule loading.
//!
//! Rules come from `.supercoder/rules.md` and then every
//! `.supercoder/rules/*.md` file in name order. Each file contributes a
//! `## <stem>` section; unreadable and blank files are skipped.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory, relative to the project root, holding per-topic rule files.
pub const RULES_DIR: &str = ".supercoder/rules";
/// Single-file alternative to [`RULES_DIR`].
pub const RULES_FILE: &str = ".supercoder/rules.md";

/// Combined project rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectRules {
    /// `(name, content)` in load order.
    pub sections: Vec<(String, String)>,
}

impl ProjectRules {
    pub fn load(project_root: &Path) -> Self {
        let mut sections = Vec::new();

        if let Some(content) = read_optional(&project_root.join(RULES_FILE)) {
            sections.push(("rules".to_string(), content));
        }

        let dir = project_root.join(RULES_DIR);
        if dir.is_dir()
            && let Ok(entries) = fs::read_dir(&dir)
        {
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
                .collect();
            paths.sort();

            for path in paths {
                let Some(content) = read_optional(&path) else {
                    continue;
                };
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                sections.push((stem, content));
            }
        }

        debug!("Loaded {} project rule file(s)", sections.len());
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Rules as prompt text, or `None` when there are none.
    pub fn to_prompt(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(
            self.sections
                .iter()
                .map(|(name, content)| format!("## {name}\n{content}"))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    /// Create the rules directory if missing.
    pub fn ensure_dir(project_root: &Path) -> std::io::Result<PathBuf> {
        let dir = project_root.join(RULES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Trimmed file content, or `None` if unreadable or blank.
fn read_optional(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
