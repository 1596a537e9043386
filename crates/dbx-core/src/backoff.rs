//! Capped exponential backoff for reconnect loops.
//!
//! Failure `n` (1-based) waits `min(base * 2^n, max)`. The counter is reset
//! after a session reaches the streaming state.

use std::time::Duration;

/// Exponential backoff without jitter; the delay sequence is deterministic.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay, attempt: 0 }
    }

    /// Register one more failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Self::delay_for(self.base, self.max_delay, self.attempt)
    }

    /// Delay for the `attempt`-th consecutive failure.
    pub fn delay_for(base: Duration, max_delay: Duration, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(max_delay)
    }

    /// Reset the failure counter (call after a successful session).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures recorded.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_first_failure() {
        let mut b = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_secs(20));
        assert_eq!(b.next_delay(), Duration::from_secs(40));
        assert_eq!(b.next_delay(), Duration::from_secs(80));
        assert_eq!(b.next_delay(), Duration::from_secs(160));
        assert_eq!(b.next_delay(), Duration::from_secs(300));
    }

    #[test]
    fn never_exceeds_cap() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        let mut b = ExponentialBackoff::new(base, cap);
        let mut prev = Duration::ZERO;
        for n in 1..=64u32 {
            let d = b.next_delay();
            assert!(d <= cap, "attempt {n} gave {d:?}");
            assert!(d >= prev);
            prev = d;
        }
        assert_eq!(b.attempt(), 64);
        assert_eq!(prev, cap);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(200));
    }
}
