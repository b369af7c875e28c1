//! Exponential-backoff policy for progress WebSocket reconnection.
//!
//! When a connection closes abnormally before the job reaches a terminal
//! state, the session increments its attempt counter and asks
//! [`ReconnectConfig::delay_for`] how long to wait. Once the counter
//! reaches [`ReconnectConfig::max_attempts`] the session gives up.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Base delay, multiplied by `2^attempt`.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Number of reconnections tried before the failure is surfaced.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection `attempt` (1-based, already incremented).
    ///
    /// Computes `min(base_delay * 2^attempt, max_delay)` without
    /// overflowing for large attempt numbers.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt may be scheduled after `attempts` have
    /// already been made.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
