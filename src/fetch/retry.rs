// src/fetch/retry.rs

//! Retry policy for failed transfers
//!
//! Retries never mutate a failed transfer; the engine re-submits a fresh one
//! built with [`Transfer::resubmit`](super::Transfer::resubmit).

use std::time::Duration;

use crate::config::Config;
use crate::error::Error;

/// Exponential retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_timeout: Duration,
    /// Delay multiplier per further retry
    pub retry_backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_timeout: Duration::from_secs(2),
            retry_backoff: 3,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_timeout: Duration::from_secs(config.retry_timeout),
            retry_backoff: config.retry_backoff,
        }
    }

    /// Delay before retry number `attempt` (0-based):
    /// `retry_timeout * retry_backoff^attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.retry_backoff.saturating_pow(attempt);
        self.retry_timeout.saturating_mul(factor)
    }

    /// Whether a failure after `attempt` retries should be retried
    pub fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(6));
        assert_eq!(policy.delay(2), Duration::from_secs(18));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy {
            max_retries: 100,
            retry_timeout: Duration::from_secs(2),
            retry_backoff: 10,
        };
        assert_eq!(policy.delay(64), Duration::from_secs(2).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let network = Error::transfer("https://x.org", "connection reset");
        let missing = Error::HttpStatus {
            url: "https://x.org".into(),
            status: 404,
        };

        assert!(policy.should_retry(0, &network));
        assert!(policy.should_retry(2, &network));
        assert!(!policy.should_retry(3, &network));
        assert!(!policy.should_retry(0, &missing));
        assert!(!RetryPolicy::none().should_retry(0, &network));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            max_retries: 5,
            retry_timeout: 1,
            retry_backoff: 2,
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }
}
