//! Retry policy with exponential backoff and jitter.
//!
//! Applied within a single candidate attempt: transient failures (timeouts,
//! rate limits, provider 5xx) may be retried against the same provider a
//! small number of times before the candidate is declared failed and the
//! engine falls back to the next one.

use orchestrator_core::{GatewayError, GatewayResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter factor (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.25,
        }
    }
}

/// Retry policy implementation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Calculate delay for a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let delay = base * 2_f64.powi(attempt as i32);
        let delay = delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = delay * self.config.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }

    /// Execute an operation, retrying transient failures.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or immediately for
    /// non-retryable errors.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt == self.config.max_retries {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::internal("retry loop exited without error")))
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        })
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: 0.0,
            ..Default::default()
        });

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let policy = fast_policy(2);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let result: GatewayResult<u32> = policy
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    if c.fetch_add(1, Ordering::Relaxed) < 1 {
                        Err(GatewayError::rate_limited("p1", None))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let policy = fast_policy(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let result: GatewayResult<u32> = policy
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err(GatewayError::invalid_credentials("p1"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let policy = fast_policy(2);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let result: GatewayResult<u32> = policy
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err(GatewayError::provider_internal("p1", "boom", Some(503)))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }
}
