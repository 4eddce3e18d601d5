//! Retry scheduling for transient venue failures.

use std::time::Duration;

use rand::Rng;

/// Exponential retry schedule with jitter.
///
/// Attempt `n` (0-based) waits `base * 2^n` plus up to 10% random jitter,
/// capped at `max_delay`. The adapter retries transient failures up to
/// `max_attempts` times before surfacing the error.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (0-based), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = exp.as_secs_f64() * rand::thread_rng().gen_range(0.0..0.1);
        Duration::from_secs_f64(exp.as_secs_f64() + jitter)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        };
        // Jitter adds at most 10%.
        let d0 = policy.delay_for(0);
        let d1 = policy.delay_for(1);
        let d2 = policy.delay_for(2);
        assert!(d0 >= Duration::from_millis(500) && d0 <= Duration::from_millis(550));
        assert!(d1 >= Duration::from_millis(1000) && d1 <= Duration::from_millis(1100));
        assert!(d2 >= Duration::from_millis(2000) && d2 <= Duration::from_millis(2200));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        assert!(policy.delay_for(9) <= Duration::from_secs_f64(4.4));
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
