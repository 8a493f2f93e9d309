//! Tuning knobs for traversal, retries and alert evaluation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between retries grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy for transient repository failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per repository call, including the first (1 = no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Delay to wait after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Traversal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Repository calls allowed in flight at once across the whole traversal.
    pub max_concurrent_fetches: usize,
    /// Children of one node descended concurrently.
    pub max_fanout: usize,
    /// Deepest level below a root (root = 0) before the descent is aborted.
    pub max_depth: usize,
    /// Per-call timeout; an expired call counts as a transient failure.
    pub fetch_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 16,
            max_fanout: 8,
            max_depth: 64,
            fetch_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl AggregationConfig {
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    pub fn with_max_fanout(mut self, max: usize) -> Self {
        self.max_fanout = max;
        self
    }

    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Low-stock evaluation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Evaluate catalog products that sit in no storage unit as count 0.
    pub include_unstocked: bool,
}

impl AlertConfig {
    pub fn with_include_unstocked(mut self, include: bool) -> Self {
        self.include_unstocked = include;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            strategy: BackoffStrategy::Exponential,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(30));

        let fixed = RetryPolicy::fixed(4, Duration::from_millis(25));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(25));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(25));
    }

    #[test]
    fn attempt_budget_includes_first_try() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(1));

        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
