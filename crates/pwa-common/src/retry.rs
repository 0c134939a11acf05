//! Host retry policy.
//!
//! The worker itself never retries. A host that drives the install step may
//! re-run it according to a [`RetryConfig`].

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles each time).
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed number of attempts with no delay between them.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before a given attempt (1-indexed). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        // A NaN product falls through `min` to `max_delay`; negatives clamp to zero.
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let secs = base.min(self.max_delay.as_secs_f64()).max(0.0);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let extra = delay.as_secs_f64() * rand::random::<f64>() * 0.25;
            delay.saturating_add(Duration::try_from_secs_f64(extra).unwrap_or(Duration::ZERO))
        } else {
            delay
        }
    }
}

/// Retry a fallible async operation with exponential backoff.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(config, operation, |_| true).await
}

/// Retry only while `should_retry` accepts the error.
///
/// Errors the predicate rejects are returned immediately.
pub async fn retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_none() {
        assert_eq!(RetryConfig::none().max_attempts, 1);
        assert_eq!(RetryConfig::immediate(0).max_attempts, 1);
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_respects_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(15));
    }

    #[test]
    fn test_degenerate_multiplier_does_not_panic() {
        let negative = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: -3.0,
            jitter: true,
            ..Default::default()
        };
        let first = negative.delay_for_attempt(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert_eq!(negative.delay_for_attempt(3), Duration::ZERO);

        let nan = RetryConfig {
            backoff_multiplier: f64::NAN,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(nan.delay_for_attempt(3), nan.max_delay);

        let unbounded = RetryConfig {
            max_delay: Duration::MAX,
            backoff_multiplier: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(unbounded.delay_for_attempt(4), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let delay = config.delay_for_attempt(2);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<i32, &str> = retry_with_backoff(&RetryConfig::immediate(3), || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err("offline")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), String> = retry_with_backoff(&RetryConfig::immediate(2), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("still offline".to_string()) }
        })
        .await;

        assert_eq!(result, Err("still offline".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_rejected_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), &str> = retry_if(
            &RetryConfig::immediate(5),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("bad config") }
            },
            |e| *e != "bad config",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
