// crates/core/src/live/backoff.rs
use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Consecutive-failure counter behind the reconnect delay.
///
/// The n-th consecutive failure waits `min(base * 2^(n-1), ceiling)`.
/// A successful open resets the count.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    /// Record a failure; returns the attempt number and the delay to wait.
    pub fn fail(&mut self) -> (u32, Duration) {
        self.failures = self.failures.saturating_add(1);
        (self.failures, delay_for(&self.policy, self.failures))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn delay_for(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    policy
        .base
        .checked_mul(factor)
        .unwrap_or(policy.ceiling)
        .min(policy.ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_to_ceiling() {
        let mut b = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u64> = (0..7).map(|_| b.fail().1.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(b.failures(), 7);
    }

    #[test]
    fn test_reset_after_open() {
        let mut b = Backoff::new(ReconnectPolicy::default());
        b.fail();
        b.fail();
        b.reset();
        assert_eq!(b.fail(), (1, Duration::from_secs(1)));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(10),
            ceiling: Duration::from_millis(80),
        };
        assert_eq!(delay_for(&policy, 200), Duration::from_millis(80));
        assert_eq!(delay_for(&policy, u32::MAX), Duration::from_millis(80));
    }
}
