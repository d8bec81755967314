//! Retry strategies for webhook delivery.

use std::time::Duration;

/// Trait for retry strategies.
///
/// The number of attempts is owned by each endpoint (`max_retries`); a
/// strategy only decides how long to wait before a given retry.
pub trait RetryStrategy: Send + Sync {
    /// Returns the wait before attempt number `attempt` (1 = first retry).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff retry strategy.
///
/// Delay before attempt `n` is `base * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay.
    pub base: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy (1s base, 1h cap).
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
        }
    }

    /// Sets the base delay.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        let delay = self.base.saturating_mul(multiplier);
        std::cmp::min(delay, self.max_delay)
    }
}
