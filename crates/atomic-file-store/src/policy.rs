//! Backoff policy for lock file acquisition.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay after the first failed acquisition attempt.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
/// Default amount added to the delay after every failed attempt.
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 100;
/// Default total time an acquirer may spend sleeping before giving up.
pub const DEFAULT_MAX_TOTAL_BACKOFF_MS: u64 = 5_000;

/// Linear backoff used while waiting for a lock file to disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    /// Delay after the first failed attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Increment applied to the delay after each failed attempt
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Cumulative sleep budget. Before each sleep the acquirer checks whether
    /// the total slept so far plus the next delay would exceed this; if so it
    /// gives up with a timeout instead of sleeping. With the defaults that is
    /// nine sleeps (100ms to 900ms, 4500ms in all) and then a timeout.
    #[serde(default = "default_max_total_backoff_ms")]
    pub max_total_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_backoff_step_ms() -> u64 {
    DEFAULT_BACKOFF_STEP_MS
}

fn default_max_total_backoff_ms() -> u64 {
    DEFAULT_MAX_TOTAL_BACKOFF_MS
}

impl LockPolicy {
    /// Create a policy with the default 100ms / +100ms / 5000ms schedule.
    pub fn new() -> Self {
        Self {
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            max_total_backoff_ms: DEFAULT_MAX_TOTAL_BACKOFF_MS,
        }
    }

    /// Set the delay after the first failed attempt.
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = millis(&backoff);
        self
    }

    /// Set the per-attempt delay increment.
    #[must_use]
    pub fn backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step_ms = millis(&step);
        self
    }

    /// Set the cumulative sleep budget.
    #[must_use]
    pub fn max_total_backoff(mut self, budget: Duration) -> Self {
        self.max_total_backoff_ms = millis(&budget);
        self
    }

    /// The sequence of sleeps an acquirer performs before giving up, assuming
    /// the lock is never released.
    ///
    /// A sleep is only taken if it keeps the cumulative total within budget.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut sleeps = Vec::new();
        let mut backoff = self.initial_backoff_ms;
        let mut waited = 0u64;

        while waited.saturating_add(backoff) <= self.max_total_backoff_ms {
            sleeps.push(Duration::from_millis(backoff));
            waited += backoff;
            backoff = backoff.saturating_add(self.backoff_step_ms);

            // a zero step with a zero delay would never terminate
            if backoff == 0 {
                break;
            }
        }

        sleeps
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
fn millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::new()
    }
}
