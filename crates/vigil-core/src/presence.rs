//! Presence debouncing and absence timing.

use std::time::{Duration, Instant};

/// Requires `required` consecutive positive ticks before presence counts
/// as confirmed. Any negative tick resets the run.
#[derive(Debug, Clone)]
pub struct PresenceDebouncer {
    required: u32,
    consecutive_ok: u32,
}

impl PresenceDebouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            consecutive_ok: 0,
        }
    }

    /// Feed one tick outcome; returns whether presence is confirmed.
    ///
    /// Level-triggered: stays true on every tick while the run is sustained.
    pub fn observe(&mut self, tick_positive: bool) -> bool {
        if tick_positive {
            self.consecutive_ok = self.consecutive_ok.saturating_add(1);
        } else {
            self.consecutive_ok = 0;
        }
        self.is_confirmed()
    }

    pub fn is_confirmed(&self) -> bool {
        self.consecutive_ok >= self.required
    }

    pub fn consecutive_ok(&self) -> u32 {
        self.consecutive_ok
    }

    pub fn reset(&mut self) {
        self.consecutive_ok = 0;
    }
}

/// Time since the authorized face was last confirmed present.
#[derive(Debug, Clone)]
pub struct AbsenceTimer {
    timeout: Duration,
    last_confirmed_at: Instant,
}

impl AbsenceTimer {
    /// Start the clock at `now` (process start).
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_confirmed_at: now,
        }
    }

    /// Record a confirmed tick. Called on every confirmed tick, so sustained
    /// presence keeps deferring the timeout.
    pub fn confirm(&mut self, now: Instant) {
        self.last_confirmed_at = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_confirmed_at)
    }

    /// True once strictly more than the timeout has passed.
    pub fn timed_out(&self, now: Instant) -> bool {
        self.elapsed(now) > self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
