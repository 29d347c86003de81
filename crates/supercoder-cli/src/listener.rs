//! Background keyboard listener active while a turn runs.
//!
//! Puts the terminal in raw mode, polls for key events every 100 ms and
//! feeds ESC presses into an [`InterruptDetector`]. In raw mode Ctrl+C is
//! delivered as a key event rather than a signal, so it aborts directly.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use supercoder::abort::{AbortSignal, InterruptDetector};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Restores cooked mode when dropped, including on panic.
pub(crate) struct RawModeGuard;

impl RawModeGuard {
    pub(crate) fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// What a key press means for the running turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Counts toward a double press.
    Interrupt,
    /// Abort immediately.
    Abort,
    Ignore,
}

pub fn classify(key: &KeyEvent) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::Ignore;
    }
    match key.code {
        KeyCode::Esc => KeyAction::Interrupt,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Abort,
        _ => KeyAction::Ignore,
    }
}

/// Handle to the listener thread. Stops on [`stop`](Self::stop) or drop.
pub struct KeyboardListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyboardListener {
    /// Spawn the listener. If the terminal cannot enter raw mode (stdin is
    /// not a tty) the thread exits at once and only the signal stays usable.
    pub fn start(detector: Arc<InterruptDetector>, abort: AbortSignal) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("keyboard-listener".into())
            .spawn(move || listen(&flag, &detector, &abort));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start keyboard listener: {e}");
                None
            }
        };
        Self { stop, handle }
    }

    /// Signal the thread and wait up to one second for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("Keyboard listener did not stop within {JOIN_TIMEOUT:?}; detaching");
        }
    }
}

impl Drop for KeyboardListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen(stop: &AtomicBool, detector: &InterruptDetector, abort: &AbortSignal) {
    let _guard = match RawModeGuard::enable() {
        Ok(guard) => guard,
        Err(e) => {
            debug!("Raw mode unavailable, keyboard interrupts disabled: {e}");
            return;
        }
    };

    while !stop.load(Ordering::SeqCst) {
        match event::poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!("Keyboard poll failed: {e}");
                return;
            }
        }
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        match classify(&key) {
            KeyAction::Interrupt => {
                if detector.press() {
                    debug!("Double ESC: abort requested");
                }
            }
            KeyAction::Abort => {
                debug!("Ctrl+C: abort requested");
                abort.abort();
            }
            KeyAction::Ignore => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn classifies_keys() {
        let esc = key(KeyCode::Esc, KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(classify(&esc), KeyAction::Interrupt);

        let ctrl_c = key(KeyCode::Char('c'), KeyModifiers::CONTROL, KeyEventKind::Press);
        assert_eq!(classify(&ctrl_c), KeyAction::Abort);

        let plain_c = key(KeyCode::Char('c'), KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(classify(&plain_c), KeyAction::Ignore);

        let released = key(KeyCode::Esc, KeyModifiers::NONE, KeyEventKind::Release);
        assert_eq!(classify(&released), KeyAction::Ignore);
    }

    #[test]
    fn stop_returns_promptly() {
        let abort = AbortSignal::new();
        let detector = Arc::new(InterruptDetector::for_signal(abort.clone()));
        let started = Instant::now();
        let listener = KeyboardListener::start(detector, abort.clone());
        listener.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!abort.is_aborted());
    }
}
