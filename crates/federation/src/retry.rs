//! Bounded retry policy for session rebuilds.
//!
//! When a peer reports our session as invalid the call is retried after
//! a fresh handshake. A peer that keeps rejecting every new session
//! would otherwise be retried forever, so rebuilds are capped and spaced
//! with exponential backoff. The first rebuild happens immediately since
//! ordinary session expiry is expected to recover on the spot.

use std::time::Duration;

/// Tunable parameters for session rebuild retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of session rebuilds for a single call.
    pub max_session_rebuilds: u32,
    /// Delay before the second rebuild.
    pub initial_delay: Duration,
    /// Upper bound on the delay between rebuilds.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each rebuild.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_session_rebuilds: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given rebuild (1-based).
    pub fn delay_before(&self, rebuild: u32) -> Duration {
        if rebuild <= 1 {
            return Duration::ZERO;
        }
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 2..rebuild {
            delay = next_delay(delay, self);
        }
        delay
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}
