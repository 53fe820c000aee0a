//! Redelivery backoff.

use crate::store::exponential_delay;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential delay before a failed message becomes leasable again:
/// `min(base * 2^attempt_count, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
}

impl RetryBackoff {
    /// Creates a backoff schedule.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay ceiling.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Returns the delay applied once a message has failed `attempt_count`
    /// times.
    #[must_use]
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        exponential_delay(self.base, attempt_count, self.max)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}
