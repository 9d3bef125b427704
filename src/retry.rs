//! Retry policy with jittered exponential backoff.

use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// How many times to try a unit of work and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Lower bound for any backoff delay, in milliseconds.
    pub backoff_min_ms: u64,
    /// Upper bound for any backoff delay, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min_ms: 4_000,
            backoff_max_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts,
            backoff_min_ms: backoff_min.as_millis() as u64,
            backoff_max_ms: backoff_max.as_millis() as u64,
        }
    }

    /// A policy that tries `max_attempts` times without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_min_ms: 0,
            backoff_max_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_min_ms",
                reason: format!(
                    "{} exceeds backoff_max_ms {}",
                    self.backoff_min_ms, self.backoff_max_ms
                ),
            });
        }
        Ok(())
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    ///
    /// Doubles from `backoff_min` with up to 10% jitter on top, always
    /// within `[backoff_min, backoff_max]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff_max_ms == 0 {
            return Duration::ZERO;
        }

        // An unvalidated policy may have min > max; max wins.
        let floor_ms = self.backoff_min_ms.min(self.backoff_max_ms);
        let exponential_base = 2u64.saturating_pow(attempt - 1);
        let delay_ms = self
            .backoff_min_ms
            .saturating_mul(exponential_base)
            .min(self.backoff_max_ms)
            .max(floor_ms);

        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis((delay_ms + jitter).min(self.backoff_max_ms))
    }

    /// Runs `op` until it succeeds, fails with an error `retryable` rejects,
    /// or attempts run out. Sleeps between attempts.
    pub fn run<T, E, F, R>(&self, what: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000));

        let b1 = policy.delay_for(1);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = policy.delay_for(2);
        assert!(b2.as_millis() >= 200 && b2.as_millis() < 220);

        let max = policy.delay_for(10);
        assert_eq!(max.as_millis(), 1000);
    }

    #[test]
    fn test_default_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..8 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(4), "attempt {} gave {:?}", attempt, delay);
            assert!(delay <= Duration::from_secs(10), "attempt {} gave {:?}", attempt, delay);
        }
    }

    #[test]
    fn test_inverted_bounds_never_exceed_max() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1));
        for attempt in 1..5 {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        assert_eq!(RetryPolicy::immediate(3).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::immediate(0).validate().is_err());
        assert!(RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1)).validate().is_err());
    }

    #[test]
    fn test_run_retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, String> = RetryPolicy::immediate(3).run(
            "flaky",
            || {
                calls += 1;
                if calls < 3 { Err("busy".to_string()) } else { Ok(calls) }
            },
            |_| true,
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = RetryPolicy::immediate(2).run(
            "always failing",
            || {
                calls += 1;
                Err("down".to_string())
            },
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_run_does_not_retry_permanent_errors() {
        let mut calls = 0;
        let _ = RetryPolicy::immediate(5).run::<(), String, _, _>(
            "permanent",
            || {
                calls += 1;
                Err("bad input".to_string())
            },
            |_| false,
        );
        assert_eq!(calls, 1);
    }
}
