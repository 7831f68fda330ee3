use std::time::{Duration, Instant};

pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(200);

/// Resolved gesture on a marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Gesture {
    SingleClick,
    DoubleClick,
}

/// Per-marker single/double click state machine.
///
/// States are `Idle` and `Pending` (a first click waiting out the window).
/// The caller feeds timestamps; nothing here sleeps.
///
/// Contract:
/// - a click while `Pending` and inside the window resolves to
///   [`Gesture::DoubleClick`] and cancels the single click
/// - a pending click whose window elapsed resolves to
///   [`Gesture::SingleClick`] through [`ClickDisambiguator::poll`]
#[derive(Debug, Clone)]
pub struct ClickDisambiguator {
    window: Duration,
    pending_since: Option<Instant>,
}

impl Default for ClickDisambiguator {
    fn default() -> Self {
        Self::new(DOUBLE_CLICK_WINDOW)
    }
}

impl ClickDisambiguator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending_since: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// When the pending single click fires, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending_since.map(|t| t + self.window)
    }

    /// Registers a click at `now`.
    ///
    /// Returns the gesture resolved by this click. A stale pending click that
    /// was never polled is flushed as a single click and the new click starts
    /// a fresh window.
    pub fn click(&mut self, now: Instant) -> Option<Gesture> {
        match self.pending_since.take() {
            Some(since) if now.saturating_duration_since(since) < self.window => {
                Some(Gesture::DoubleClick)
            }
            Some(_) => {
                self.pending_since = Some(now);
                Some(Gesture::SingleClick)
            }
            None => {
                self.pending_since = Some(now);
                None
            }
        }
    }

    /// Fires the pending single click once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Gesture> {
        let deadline = self.deadline()?;
        if now >= deadline {
            self.pending_since = None;
            Some(Gesture::SingleClick)
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.pending_since = None;
    }
}
