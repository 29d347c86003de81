//! Definition tags pulled from source files with line-anchored regexes.

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Extensions whose files are scanned for definitions.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "scala", "java", "js", "ts", "go", "rs", "c", "cpp", "rb", "php",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Classes, structs, traits and objects.
    Class,
    Function,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Class => "class",
            Self::Function => "function",
        })
    }
}

/// One definition found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub kind: TagKind,
    pub file: PathBuf,
    /// 1-based.
    pub line: usize,
}

static CLASS_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:class|object|trait|struct)\s+(\w+)")
        .expect("valid regex")
});

static FUNCTION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:def|func|fn|function)\s+(\w+)")
        .expect("valid regex")
});

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Definitions in `content`, in line order. At most one tag per line.
pub fn extract_tags(file: &Path, content: &str) -> Vec<Tag> {
    let patterns = [(&*CLASS_DEF, TagKind::Class), (&*FUNCTION_DEF, TagKind::Function)];
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            patterns.iter().find_map(|(re, kind)| {
                re.captures(line).and_then(|c| c.get(1)).map(|name| Tag {
                    name: name.as_str().to_string(),
                    kind: *kind,
                    file: file.to_path_buf(),
                    line: i + 1,
                })
            })
        })
        .collect()
}
