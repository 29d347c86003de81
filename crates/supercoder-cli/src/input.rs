//! Prompt input: a single-line editor with persistent history and
//! slash-command completion.
//!
//! [`TerminalInput`] drives a [`LineEditor`] from crossterm key events in
//! raw mode and records submitted lines in `.supercoder/history`. When
//! stdin is not a terminal, [`PlainInput`] reads lines as they come.

use crossterm::cursor::MoveToColumn;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::listener::RawModeGuard;

/// Project-relative history file.
pub const HISTORY_FILE: &str = ".supercoder/history";

/// Entries kept in memory and loaded from disk.
pub const MAX_HISTORY: usize = 1000;

/// Result of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl+C at the prompt.
    Interrupted,
    Eof,
}

/// Where the REPL gets its lines from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome>;

    /// Record a submitted line for later recall.
    fn remember(&mut self, _line: &str) {}
}

// ── History ────────────────────────────────────────────────────────

/// Submitted lines, oldest first, optionally backed by a file with one
/// entry per line.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
    path: Option<PathBuf>,
}

impl History {
    /// Load from `path`. A missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries: Vec<String> = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                debug!("No input history at {}: {e}", path.display());
                Vec::new()
            }
        };
        if entries.len() > MAX_HISTORY {
            entries.drain(..entries.len() - MAX_HISTORY);
        }
        Self {
            entries,
            path: Some(path),
        }
    }

    pub fn for_project(root: &Path) -> Self {
        Self::load(root.join(HISTORY_FILE))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Append `line` and persist it. Blank lines and immediate repeats are
    /// not recorded.
    pub fn push(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim();
        if line.is_empty() || self.entries.last().is_some_and(|last| last == line) {
            return Ok(());
        }
        self.entries.push(line.to_string());
        if self.entries.len() > MAX_HISTORY {
            self.entries.remove(0);
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

// ── Completion ─────────────────────────────────────────────────────

/// Commands starting with `word`, ignoring case. Only a lone slash word
/// completes.
pub fn complete<'a>(word: &str, commands: &[&'a str]) -> Vec<&'a str> {
    if !word.starts_with('/') || word.contains(char::is_whitespace) {
        return Vec::new();
    }
    let word = word.to_lowercase();
    commands
        .iter()
        .copied()
        .filter(|c| c.starts_with(&word))
        .collect()
}

fn common_prefix(candidates: &[&str]) -> String {
    let Some((first, rest)) = candidates.split_first() else {
        return String::new();
    };
    let mut prefix: Vec<char> = first.chars().collect();
    for candidate in rest {
        let shared = prefix
            .iter()
            .zip(candidate.chars())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }
    prefix.into_iter().collect()
}

// ── LineEditor ─────────────────────────────────────────────────────

/// What the caller should do after a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    /// Redraw the line.
    Redraw,
    /// Show these completion candidates, then redraw.
    Candidates(Vec<String>),
    Submit(String),
    Cancel,
    Eof,
}

/// Editable line with a cursor and history browsing. Holds no terminal
/// state, so it can be driven by synthetic key events.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    cursor: usize,
    /// Index into the history while browsing it.
    browsing: Option<usize>,
    /// The unsubmitted line, restored when browsing past the newest entry.
    draft: Vec<char>,
}

impl LineEditor {
    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    /// Cursor position in characters.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn set(&mut self, chars: Vec<char>) {
        self.cursor = chars.len();
        self.buffer = chars;
    }

    fn reset(&mut self) -> String {
        let text = self.text();
        *self = Self::default();
        text
    }

    pub fn handle(&mut self, key: &KeyEvent, history: &[String], commands: &[&str]) -> EditAction {
        if key.kind == KeyEventKind::Release {
            return EditAction::Redraw;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => {
                self.reset();
                EditAction::Cancel
            }
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    return EditAction::Eof;
                }
                if self.cursor < self.buffer.len() {
                    self.buffer.remove(self.cursor);
                }
                EditAction::Redraw
            }
            KeyCode::Char('u') if ctrl => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                EditAction::Redraw
            }
            KeyCode::Char('a') if ctrl => {
                self.cursor = 0;
                EditAction::Redraw
            }
            KeyCode::Char('e') if ctrl => {
                self.cursor = self.buffer.len();
                EditAction::Redraw
            }
            KeyCode::Char(c) if !ctrl => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
                EditAction::Redraw
            }
            KeyCode::Enter => EditAction::Submit(self.reset()),
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buffer.remove(self.cursor);
                }
                EditAction::Redraw
            }
            KeyCode::Delete => {
                if self.cursor < self.buffer.len() {
                    self.buffer.remove(self.cursor);
                }
                EditAction::Redraw
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                EditAction::Redraw
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(self.buffer.len());
                EditAction::Redraw
            }
            KeyCode::Home => {
                self.cursor = 0;
                EditAction::Redraw
            }
            KeyCode::End => {
                self.cursor = self.buffer.len();
                EditAction::Redraw
            }
            KeyCode::Up => {
                self.history_back(history);
                EditAction::Redraw
            }
            KeyCode::Down => {
                self.history_forward(history);
                EditAction::Redraw
            }
            KeyCode::Tab => self.complete(commands),
            _ => EditAction::Redraw,
        }
    }

    fn history_back(&mut self, history: &[String]) {
        let idx = match self.browsing {
            None if history.is_empty() => return,
            None => {
                self.draft = self.buffer.clone();
                history.len() - 1
            }
            Some(idx) => idx.saturating_sub(1),
        };
        self.browsing = Some(idx);
        if let Some(entry) = history.get(idx) {
            self.set(entry.chars().collect());
        }
    }

    fn history_forward(&mut self, history: &[String]) {
        let Some(idx) = self.browsing else {
            return;
        };
        if idx + 1 < history.len() {
            self.browsing = Some(idx + 1);
            if let Some(entry) = history.get(idx + 1) {
                self.set(entry.chars().collect());
            }
        } else {
            self.browsing = None;
            let draft = std::mem::take(&mut self.draft);
            self.set(draft);
        }
    }

    fn complete(&mut self, commands: &[&str]) -> EditAction {
        let word: String = self.buffer.iter().take(self.cursor).collect();
        let candidates = complete(&word, commands);
        let rest: Vec<char> = self.buffer.split_off(self.cursor);
        let completed = match candidates.as_slice() {
            [] => word,
            [only] => format!("{only} "),
            // Every candidate extends the lowercased word.
            many => common_prefix(many),
        };
        self.buffer = completed.chars().collect();
        self.cursor = self.buffer.len();
        self.buffer.extend(rest);
        if candidates.len() > 1 {
            EditAction::Candidates(candidates.into_iter().map(str::to_string).collect())
        } else {
            EditAction::Redraw
        }
    }
}

// ── Input sources ──────────────────────────────────────────────────

/// Interactive prompt on the controlling terminal.
pub struct TerminalInput {
    history: History,
    commands: &'static [&'static str],
}

impl TerminalInput {
    pub fn new(history: History, commands: &'static [&'static str]) -> Self {
        Self { history, commands }
    }

    fn render(out: &mut impl Write, prompt: &str, editor: &LineEditor) -> io::Result<()> {
        let column = prompt.chars().count() + editor.cursor();
        queue!(
            out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(prompt),
            Print(editor.text()),
            MoveToColumn(u16::try_from(column).unwrap_or(u16::MAX)),
        )?;
        out.flush()
    }
}

impl LineSource for TerminalInput {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        let _raw = RawModeGuard::enable()?;
        let mut out = io::stdout();
        let mut editor = LineEditor::default();
        Self::render(&mut out, prompt, &editor)?;
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match editor.handle(&key, self.history.entries(), self.commands) {
                EditAction::Redraw => {}
                EditAction::Candidates(candidates) => {
                    write!(out, "\r\n{}\r\n", candidates.join("  "))?;
                }
                EditAction::Submit(line) => {
                    write!(out, "\r\n")?;
                    out.flush()?;
                    return Ok(ReadOutcome::Line(line));
                }
                EditAction::Cancel => {
                    write!(out, "^C\r\n")?;
                    out.flush()?;
                    return Ok(ReadOutcome::Interrupted);
                }
                EditAction::Eof => {
                    write!(out, "\r\n")?;
                    out.flush()?;
                    return Ok(ReadOutcome::Eof);
                }
            }
            Self::render(&mut out, prompt, &editor)?;
        }
    }

    fn remember(&mut self, line: &str) {
        if let Err(e) = self.history.push(line) {
            warn!("Failed to save input history: {e}");
        }
    }
}

/// Line-at-a-time input from any reader, e.g. piped stdin.
pub struct PlainInput<R> {
    reader: R,
}

impl<R: BufRead> PlainInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for PlainInput<R> {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(ReadOutcome::Eof);
        }
        Ok(ReadOutcome::Line(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
