//! Canonical tool name constants.
//!
//! All tool-name string literals should reference these constants to avoid
//! scattered magic strings. When a tool is renamed, only this file needs
//! to change.

pub const FILE_READ: &str = "file-read";
pub const CODE_SEARCH: &str = "code-search";
pub const CODE_EDIT: &str = "code-edit";
pub const PROJECT_STRUCTURE: &str = "project-structure";
pub const COMMAND_EXEC: &str = "command-exec";

/// Every built-in tool, in registration order.
pub const ALL: &[&str] = &[
    FILE_READ,
    CODE_SEARCH,
    CODE_EDIT,
    PROJECT_STRUCTURE,
    COMMAND_EXEC,
];

/// Short names some models emit instead of the canonical ones.
pub const ALIASES: &[(&str, &str)] = &[
    ("create", CODE_EDIT),
    ("edit", CODE_EDIT),
    ("write", CODE_EDIT),
    ("read", FILE_READ),
    ("search", CODE_SEARCH),
    ("grep", CODE_SEARCH),
    ("exec", COMMAND_EXEC),
    ("run", COMMAND_EXEC),
    ("shell", COMMAND_EXEC),
    ("structure", PROJECT_STRUCTURE),
    ("tree", PROJECT_STRUCTURE),
];

/// Lowercase and fold `_` to `-`, so `Code_Edit` and `code-edit` compare equal.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

/// Map a possibly abbreviated name to its canonical form.
///
/// Unknown names come back normalized but otherwise unchanged.
pub fn resolve_alias(name: &str) -> String {
    let normalized = normalize(name);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(normalized)
}
