//! Chat sessions persisted as JSON files.
//!
//! Each session is one pretty-printed `<id>.json` file under
//! `.supercoder/sessions/`. Writes go to a temp file and are renamed into
//! place. Only the newest [`MAX_SESSIONS`] are kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::{Message, MessageRole};

/// Sessions kept on disk; older ones are pruned on save.
pub const MAX_SESSIONS: usize = 10;
/// Sessions directory, relative to the project root.
pub const SESSIONS_DIR: &str = ".supercoder/sessions";

const TITLE_MAX_CHARS: usize = 50;
const DEFAULT_TITLE: &str = "New Session";

// ── ChatSession ────────────────────────────────────────────────────

/// A saved conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatSession {
    /// Short random id, also the file stem.
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Whether the history was replaced by a compaction summary.
    #[serde(default)]
    pub is_compacted: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl ChatSession {
    pub fn new() -> Self {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: id.chars().take(8).collect(),
            title: default_title(),
            created_at: now,
            last_modified: now,
            is_compacted: false,
            messages: Vec::new(),
        }
    }

    /// Title from the latest real user message, whitespace-collapsed and
    /// cut to 50 chars. `None` when there is no such message.
    pub fn derive_title(&self) -> Option<String> {
        let last = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User && !m.is_tool_result())?;
        let flat = last.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.is_empty() {
            return None;
        }
        if flat.chars().count() > TITLE_MAX_CHARS {
            let head: String = flat.chars().take(TITLE_MAX_CHARS).collect();
            Some(format!("{}...", head.trim_end()))
        } else {
            Some(flat)
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry for [`SessionManager::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub is_compacted: bool,
    pub message_count: usize,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            created_at: session.created_at,
            last_modified: session.last_modified,
            is_compacted: session.is_compacted,
            message_count: session.messages.len(),
        }
    }
}

// ── SessionManager ─────────────────────────────────────────────────

/// Session store rooted at a directory.
///
/// ```text
/// .supercoder/sessions/
///   3f2a9c01.json
///   b7e40d5a.json
/// ```
pub struct SessionManager {
    sessions_dir: PathBuf,
    max_sessions: usize,
}

impl SessionManager {
    /// Store under `<project_root>/.supercoder/sessions/`, creating it.
    pub fn for_project(project_root: &Path) -> Result<Self, SessionError> {
        Self::new(project_root.join(SESSIONS_DIR))
    }

    pub fn new(sessions_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let sessions_dir = sessions_dir.into();
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self {
            sessions_dir,
            max_sessions: MAX_SESSIONS,
        })
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    /// A fresh, unsaved session.
    pub fn create(&self) -> ChatSession {
        ChatSession::new()
    }

    /// Stamp, retitle and write `session`, then prune old sessions.
    pub fn save(&self, session: &mut ChatSession) -> Result<(), SessionError> {
        self.save_at(session, Utc::now())
    }

    fn save_at(&self, session: &mut ChatSession, now: DateTime<Utc>) -> Result<(), SessionError> {
        session.last_modified = now;
        if let Some(title) = session.derive_title() {
            session.title = title;
        }

        let final_path = self.session_path(&session.id);
        let tmp_path = self.sessions_dir.join(format!(".{}.json.tmp", session.id));
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&tmp_path, json)?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        debug!(
            "Saved session {} ({} messages)",
            session.id,
            session.messages.len()
        );

        self.prune()
    }

    pub fn load(&self, id: &str) -> Result<ChatSession, SessionError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Readable sessions, newest first. Corrupt files are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !is_json || hidden {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(SessionError::from)
                .and_then(|json| Ok(serde_json::from_str::<ChatSession>(&json)?));
            match parsed {
                Ok(session) => sessions.push(SessionSummary::from(&session)),
                Err(e) => warn!("Skipping unreadable session {}: {e}", path.display()),
            }
        }
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(sessions)
    }

    /// `Ok(false)` when no such session exists.
    pub fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn prune(&self) -> Result<(), SessionError> {
        let sessions = self.list()?;
        for stale in sessions.iter().skip(self.max_sessions) {
            debug!("Pruning old session {}", stale.id);
            self.delete(&stale.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::for_project(dir.path()).unwrap();
        (dir, manager)
    }

    #[test]
    fn new_session_has_short_id() {
        let session = ChatSession::new();
        assert_eq!(session.id.len(), 8);
        assert_eq!(session.title, "New Session");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn save_and_load_preserves_messages() {
        let (_dir, manager) = manager();
        let mut session = manager.create();
        session.messages = vec![
            Message::user("Fix the parser"),
            Message::assistant("Looking at it"),
            Message::tool_results("[file-read]: fn main() {}"),
        ];
        manager.save(&mut session).unwrap();

        let loaded = manager.load(&session.id).unwrap();
        assert_eq!(loaded.messages, session.messages);
        assert_eq!(loaded.title, "Fix the parser");
        assert_eq!(loaded, session);
    }

    #[test]
    fn missing_session_is_not_found() {
        let (_dir, manager) = manager();
        assert!(matches!(manager.load("nope"), Err(SessionError::NotFound(id)) if id == "nope"));
        assert!(!manager.delete("nope").unwrap());
    }

    #[test]
    fn title_skips_tool_results_and_truncates() {
        let mut session = ChatSession::new();
        session.messages = vec![
            Message::user(format!("{}\nsecond line", "word ".repeat(20))),
            Message::tool_results("[code-search]: 3 matches"),
        ];
        let title = session.derive_title().unwrap();
        assert!(title.ends_with("..."));
        assert!(!title.contains('\n'));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 3);

        session.messages = vec![Message::tool_results("only results")];
        assert!(session.derive_title().is_none());
    }

    #[test]
    fn list_is_newest_first_and_prunes() {
        let (_dir, manager) = manager();
        let manager = manager.with_max_sessions(3);
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut session = ChatSession::new();
            session.messages.push(Message::user(format!("task {i}")));
            manager.save_at(&mut session, base + Duration::seconds(i)).unwrap();
            ids.push(session.id);
        }

        let listed = manager.list().unwrap();
        let listed_ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(listed_ids, vec![ids[4].as_str(), ids[3].as_str(), ids[2].as_str()]);
        assert_eq!(listed[0].title, "task 4");
        assert_eq!(listed[0].message_count, 1);
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let (_dir, manager) = manager();
        fs::write(manager.dir().join("broken.json"), "{not json").unwrap();
        let mut session = manager.create();
        manager.save(&mut session).unwrap();
        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
    }
}
