//! Retry bounds and the exponential backoff schedule for backend calls.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call. Total calls are `max_retries + 1`.
    pub max_retries: u32,
    /// Base of the exponential schedule; the delay before retry `n` (0-based)
    /// is `unit * base^n`.
    pub backoff_base: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: u32) -> Self {
        Self {
            max_retries,
            backoff_base,
            unit: Duration::from_secs(1),
        }
    }

    /// Same bounds, no waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base: 1,
            unit: Duration::ZERO,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(attempt);
        self.unit.saturating_mul(factor)
    }
}
