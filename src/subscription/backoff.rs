//! Capped exponential backoff for reconnect scheduling.

use std::time::Duration;

/// Reconnect delay that doubles on each failure up to a cap.
///
/// The delay handed out by [`Backoff::next_delay`] is the *current* value;
/// the stored value is doubled afterwards, so the first failure waits
/// `initial`, the second `2 * initial`, and so on until `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// `initial` larger than `max` is clamped to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next retry. Advances the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay the next failure would be scheduled at.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
