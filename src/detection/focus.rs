//! Debouncing of raw per-frame presence signals.
//!
//! Adverse conditions only take effect once they have held continuously for
//! longer than their threshold. Recovery is immediate.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks how long a boolean condition has held without interruption.
#[derive(Debug, Clone)]
pub struct HoldTimer {
    threshold: Duration,
    started_at: Option<Instant>,
}

impl HoldTimer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            started_at: None,
        }
    }

    /// Feed the condition for this tick. Returns true once it has held for
    /// strictly longer than the threshold. The first adverse tick only arms
    /// the timer.
    pub fn observe(&mut self, condition: bool, now: Instant) -> bool {
        if !condition {
            self.started_at = None;
            return false;
        }

        match self.started_at {
            None => {
                self.started_at = Some(now);
                false
            }
            Some(start) => now.saturating_duration_since(start) > self.threshold,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn reset(&mut self) {
        self.started_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusSignals {
    pub face_detected: bool,
    pub has_suspicious_object: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusState {
    pub is_focused: bool,
    pub face_detected: bool,
}

impl Default for FocusState {
    fn default() -> Self {
        Self {
            is_focused: true,
            face_detected: true,
        }
    }
}

/// Two independent hold timers: face absence, and inattention (face absent
/// or a prohibited object in view).
#[derive(Debug, Clone)]
pub struct FocusTracker {
    inattention: HoldTimer,
    face_absence: HoldTimer,
}

impl FocusTracker {
    pub fn new(focus_lost_threshold: Duration, no_face_threshold: Duration) -> Self {
        Self {
            inattention: HoldTimer::new(focus_lost_threshold),
            face_absence: HoldTimer::new(no_face_threshold),
        }
    }

    pub fn update(&mut self, signals: FocusSignals, now: Instant) -> FocusState {
        let face_missing = self.face_absence.observe(!signals.face_detected, now);
        let inattentive = !signals.face_detected || signals.has_suspicious_object;
        let focus_lost = self.inattention.observe(inattentive, now);

        FocusState {
            is_focused: !focus_lost,
            face_detected: !face_missing,
        }
    }

    pub fn reset(&mut self) {
        self.inattention.reset();
        self.face_absence.reset();
    }
}
