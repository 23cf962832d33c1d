//! Exponential backoff with full jitter.
//!
//! Shared by the watch session (reconnects) and the engine (per-route
//! speaker retries). Attempts are 1-based counts of consecutive failures.

use std::time::Duration;

use rand::Rng;

/// Backoff policy: `delay(n)` is uniform in `[0, min(cap, base * 2^(n-1))]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Ceiling for the first retry.
    pub base: Duration,
    /// Upper bound for any delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Upper bound of the jitter window after `attempt` failures.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Jittered delay before the next try after `attempt` failures.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Whether a failure on `attempt` should be logged loudly.
///
/// True on attempts 1, 2, 4, 8, ... so a route stuck failing logs a
/// logarithmic number of warnings.
#[must_use]
pub const fn should_warn(attempt: u32) -> bool {
    attempt.is_power_of_two()
}

/// Attempt counter driving a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure and return how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay(self.attempt)
    }

    /// Consecutive failures so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::ZERO);
        assert_eq!(policy.ceiling(1), Duration::from_millis(250));
        assert_eq!(policy.ceiling(2), Duration::from_millis(500));
        assert_eq!(policy.ceiling(3), Duration::from_secs(1));
        assert_eq!(policy.ceiling(8), Duration::from_secs(30));
        assert_eq!(policy.ceiling(64), Duration::from_secs(30));
        assert_eq!(policy.ceiling(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_stays_in_window() {
        let policy = RetryPolicy::default();
        for attempt in 1..20 {
            for _ in 0..50 {
                assert!(policy.delay(attempt) <= policy.ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_zero_base_never_waits() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_warn_decay() {
        let loud: Vec<u32> = (1..=20).filter(|a| should_warn(*a)).collect();
        assert_eq!(loud, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }
}
