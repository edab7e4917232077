//! Connection retry policy
//!
//! A deliberately simple fixed-delay policy: every failed attempt waits the
//! same debounce interval before the next one. The delay never grows; the
//! reconnect cadence is part of the externally observable behavior, so this
//! must not be swapped for an exponential schedule.

use std::fmt;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};

/// Decides whether another connection attempt is permitted and how long to
/// wait before it.
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    interval: Duration,
    debounce: Constant,
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget (`None` = unlimited)
    /// and fixed inter-attempt delay.
    pub fn new(max_attempts: Option<u32>, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            debounce: Constant::new(interval),
        }
    }

    /// Whether the attempt with the given 0-based index may proceed.
    pub fn should_retry(&self, attempt_index: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempt_index < max,
        }
    }

    /// The fixed wait before the next permitted attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.debounce.next_backoff().unwrap_or(self.interval)
    }

    /// The configured attempt budget (`None` = unlimited).
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The configured debounce interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Attempt counter for the current acquisition cycle.
///
/// Reset to zero on every successful open: the budget governs acquiring a
/// connection, and a fresh budget starts once one has been established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt_index: u32,
}

impl RetryState {
    /// The 0-based index of the next attempt.
    pub fn attempt_index(&self) -> u32 {
        self.attempt_index
    }

    /// Count a failed attempt.
    pub fn record_failure(&mut self) {
        self.attempt_index += 1;
    }

    /// Reset the counter after a successful open.
    pub fn reset(&mut self) {
        self.attempt_index = 0;
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_always_retries() {
        let policy = RetryPolicy::new(None, Duration::from_millis(100));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(5));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn test_finite_budget() {
        let policy = RetryPolicy::new(Some(3), Duration::from_millis(100));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_zero_budget_denies_first_attempt() {
        let policy = RetryPolicy::new(Some(0), Duration::from_millis(100));
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_delay_is_fixed() {
        let mut policy = RetryPolicy::new(Some(10), Duration::from_millis(250));
        // The delay must not grow across attempts.
        for _ in 0..8 {
            assert_eq!(policy.next_delay(), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_state_counts_and_resets() {
        let mut state = RetryState::default();
        assert_eq!(state.attempt_index(), 0);

        state.record_failure();
        state.record_failure();
        assert_eq!(state.attempt_index(), 2);

        state.reset();
        assert_eq!(state.attempt_index(), 0);
    }

    #[test]
    fn test_state_never_exceeds_finite_budget_when_checked() {
        let policy = RetryPolicy::new(Some(3), Duration::from_millis(1));
        let mut state = RetryState::default();

        let mut attempts = 0;
        while policy.should_retry(state.attempt_index()) {
            attempts += 1;
            state.record_failure();
        }

        assert_eq!(attempts, 3);
        assert_eq!(state.attempt_index(), 3);
    }
}
