//! Cooperative cancellation for the turn loop.
//!
//! [`AbortSignal`] is a shared flag that the front end sets and the turn
//! loop polls at every streamed chunk and between tool calls. Nothing is
//! forcibly killed: tools that honor the signal (command execution) stop
//! their own subprocesses.
//!
//! [`InterruptDetector`] debounces key presses so that a single stray
//! press only warns and a second press inside the window aborts.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Aborted;

/// Default window in which a second press counts as a double press.
pub const DEFAULT_DOUBLE_PRESS_WINDOW: Duration = Duration::from_millis(500);

// ── AbortSignal ────────────────────────────────────────────────────

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            debug!("Abort requested");
        }
    }

    /// Clear the flag before a new top-level turn.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// `Err(Aborted)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), Aborted> {
        if self.is_aborted() {
            Err(Aborted)
        } else {
            Ok(())
        }
    }
}

// ── InterruptDetector ──────────────────────────────────────────────

type PressCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct PressState {
    count: u32,
    last_event: Option<Instant>,
}

/// Timer-gated press counter.
///
/// Each press resets the count if the previous press is older than the
/// window, then increments. The first press of a sequence fires
/// `on_first_press`; reaching two fires `on_interrupt` and resets.
pub struct InterruptDetector {
    window: Duration,
    state: Mutex<PressState>,
    on_first_press: Option<PressCallback>,
    on_interrupt: PressCallback,
}

impl InterruptDetector {
    pub fn new(on_interrupt: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            window: DEFAULT_DOUBLE_PRESS_WINDOW,
            state: Mutex::new(PressState::default()),
            on_first_press: None,
            on_interrupt: Box::new(on_interrupt),
        }
    }

    /// Detector whose double press aborts `signal`.
    pub fn for_signal(signal: AbortSignal) -> Self {
        Self::new(move || signal.abort())
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_first_press(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_first_press = Some(Box::new(callback));
        self
    }

    /// Record a press now. Returns `true` if it completed a double press.
    pub fn press(&self) -> bool {
        self.press_at(Instant::now())
    }

    /// Record a press at `now`.
    pub fn press_at(&self, now: Instant) -> bool {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state
                .last_event
                .is_some_and(|last| now.saturating_duration_since(last) > self.window)
            {
                state.count = 0;
            }
            state.count += 1;
            state.last_event = Some(now);
            if state.count >= 2 {
                state.count = 0;
                true
            } else {
                false
            }
        };

        if fired {
            (self.on_interrupt)();
        } else if let Some(cb) = &self.on_first_press {
            cb();
        }
        fired
    }

    /// Current press count within the active window.
    pub fn count(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).count
    }
}

impl std::fmt::Debug for InterruptDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptDetector")
            .field("window", &self.window)
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn abort_and_reset() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.check().is_ok());

        signal.abort();
        assert!(signal.is_aborted());
        assert_eq!(signal.check(), Err(Aborted));

        signal.reset();
        assert!(!signal.is_aborted());
    }

    #[test]
    fn clones_share_the_flag() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.abort()).join().unwrap();
        assert!(signal.is_aborted());
    }

    #[test]
    fn double_press_within_window_fires() {
        let signal = AbortSignal::new();
        let detector = InterruptDetector::for_signal(signal.clone());
        let t0 = Instant::now();

        assert!(!detector.press_at(t0));
        assert!(!signal.is_aborted());
        assert!(detector.press_at(t0 + Duration::from_millis(200)));
        assert!(signal.is_aborted());
        assert_eq!(detector.count(), 0);
    }

    #[test]
    fn presses_outside_window_reset_count() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let detector = InterruptDetector::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let t0 = Instant::now();

        detector.press_at(t0);
        detector.press_at(t0 + Duration::from_millis(900));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(detector.count(), 1);
    }

    #[test]
    fn first_press_callback_runs_once_per_sequence() {
        let warnings = Arc::new(AtomicU32::new(0));
        let w = warnings.clone();
        let detector = InterruptDetector::new(|| {}).with_first_press(move || {
            w.fetch_add(1, Ordering::SeqCst);
        });
        let t0 = Instant::now();

        detector.press_at(t0);
        detector.press_at(t0 + Duration::from_millis(100));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }
}
