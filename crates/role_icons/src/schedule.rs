//! Deadline timers polled once per tick.
//!
//! Times are seconds on the host's monotonic clock. A timer is re-armed from the
//! tick that fired it, so a late tick never causes a burst of catch-up firings.

/// A point in time after which some work is due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadline {
    at: f64,
}

impl Deadline {
    /// A deadline that is already due.
    pub const fn immediate() -> Self {
        Self {
            at: f64::NEG_INFINITY,
        }
    }

    pub const fn at(at: f64) -> Self {
        Self { at }
    }

    pub fn time(&self) -> f64 {
        self.at
    }

    pub fn is_due(&self, now: f64) -> bool {
        now >= self.at
    }

    pub fn rearm(&mut self, now: f64, interval: f64) {
        self.at = now + interval;
    }

    /// Returns `true` when due and re-arms for `interval` seconds after `now`.
    pub fn fire(&mut self, now: f64, interval: f64) -> bool {
        if self.is_due(now) {
            self.rearm(now, interval);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        *self = Self::immediate();
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::immediate()
    }
}
