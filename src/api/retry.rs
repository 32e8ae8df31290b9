use std::{collections::BTreeSet, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Invalid retry policy config
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum InvalidRetryPolicy {
    /// base delay is zero
    #[snafu(display("retry base delay must be positive"))]
    ZeroBaseDelay,

    /// multiplier would not grow the delay
    #[snafu(display("retry multiplier {multiplier} must be greater than 1"))]
    MultiplierTooSmall {
        /// configured multiplier
        multiplier: f64,
    },

    /// ceiling is below the first delay
    #[snafu(display("retry max delay {max_delay_ms}ms is below base delay {base_delay_ms}ms"))]
    MaxDelayBelowBase {
        /// configured base delay
        base_delay_ms: u64,
        /// configured ceiling
        max_delay_ms: u64,
    },
}

/// Exponential backoff policy for api requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// retries after the first attempt
    pub max_retries: u32,
    /// delay before the first retry
    pub base_delay_ms: u64,
    /// growth factor of delay between retries
    pub multiplier: f64,
    /// ceiling for a server requested `Retry-After` delay
    pub max_delay_ms: u64,
    /// http status codes worth retrying
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default retryable statuses
    pub fn new(
        max_retries: u32,
        base_delay_ms: u64,
        multiplier: f64,
    ) -> Result<Self, InvalidRetryPolicy> {
        let policy = Self {
            max_retries,
            base_delay_ms,
            multiplier,
            ..Default::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy can produce a growing delay
    pub fn validate(&self) -> Result<(), InvalidRetryPolicy> {
        ensure!(self.base_delay_ms > 0, error::ZeroBaseDelay);
        ensure!(
            self.multiplier > 1.0,
            error::MultiplierTooSmall {
                multiplier: self.multiplier
            }
        );
        ensure!(
            self.max_delay_ms >= self.base_delay_ms,
            error::MaxDelayBelowBase {
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
            }
        );
        Ok(())
    }

    /// `base_delay * multiplier ^ attempt`, attempt counts from zero
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        // float to int `as` saturates
        Duration::from_millis(ms as u64)
    }

    /// Delay before retry `attempt` when the server asked for `retry_after`.
    ///
    /// The server may lengthen the backoff up to `max_delay_ms`, never shorten it.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay(attempt);
        match retry_after {
            Some(requested) => requested
                .min(Duration::from_millis(self.max_delay_ms))
                .max(delay),
            None => delay,
        }
    }

    /// Check if another retry is allowed after `attempt` retries
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Check if a response with `status` should be retried
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(3, 1000, 2.0).unwrap();

        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX, 1000, 10.0).unwrap();
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_backoff_with_retry_after() {
        let mut policy = RetryPolicy::new(3, 100, 2.0).unwrap();
        policy.max_delay_ms = 5000;

        assert_eq!(policy.backoff(1, None), Duration::from_millis(200));
        assert_eq!(policy.backoff(1, Some(Duration::ZERO)), Duration::from_millis(200));
        assert_eq!(policy.backoff(0, Some(Duration::from_secs(1))), Duration::from_secs(1));
        assert_eq!(
            policy.backoff(0, Some(Duration::from_secs(86_400))),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::new(2, 10, 1.5).unwrap();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_default_retryable_statuses() {
        let policy = RetryPolicy::default();

        for code in [408, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400, 401, 403, 404, 422, 501] {
            assert!(!policy.is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_invalid_policies() {
        assert!(matches!(
            RetryPolicy::new(3, 0, 2.0),
            Err(InvalidRetryPolicy::ZeroBaseDelay)
        ));
        assert!(matches!(
            RetryPolicy::new(3, 100, 1.0),
            Err(InvalidRetryPolicy::MultiplierTooSmall { .. })
        ));

        let policy = RetryPolicy {
            max_delay_ms: 10,
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(InvalidRetryPolicy::MaxDelayBelowBase { .. })
        ));
    }
}
