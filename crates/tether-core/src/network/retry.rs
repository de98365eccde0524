//! Retry logic with exponential backoff.
//!
//! Only failures where no response arrived, or where the server answered
//! 5xx, are retried. A 4xx is final after one attempt, and a circuit
//! breaker rejection is never retried.

use crate::config::NetworkConfig;
use crate::error::{Result, TetherError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behavior for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Whether to scale delays by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt + 1` (0-indexed).
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2f64.powi(attempt.min(62) as i32);
        let capped_secs =
            (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// Returns the delay to wait first, or `None` when the error is final or
    /// the retry budget is spent.
    pub fn should_retry(&self, attempt: u32, error: &TetherError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_retries {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Run an async operation under a retry policy.
///
/// Returns the final result together with statistics about the attempts.
pub async fn retry_async<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                let Some(delay) = policy.should_retry(attempt, &e) else {
                    if e.is_retryable() && policy.max_retries > 0 {
                        warn!(
                            "All {} attempts exhausted. Last error: {}",
                            policy.max_attempts(),
                            e
                        );
                    } else {
                        debug!("Not retrying: {}", e);
                    }
                    return (Err(e), stats);
                };

                stats.total_delay += delay;
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts(),
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn server_error() -> TetherError {
        TetherError::Server {
            status: 500,
            body: String::new(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30));

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(200), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(
                delay >= Duration::from_secs(2) && delay <= Duration::from_secs(6),
                "Delay {:?} should be between 2s and 6s",
                delay
            );
        }
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = RetryPolicy::new().with_max_retries(2);

        assert!(policy.should_retry(0, &server_error()).is_some());
        assert!(policy.should_retry(0, &TetherError::network("reset")).is_some());
        assert!(policy.should_retry(2, &server_error()).is_none());

        let client = TetherError::from_status(400, "bad").unwrap();
        assert!(policy.should_retry(0, &client).is_none());

        let open = TetherError::CircuitOpen {
            target: "api".into(),
        };
        assert!(policy.should_retry(0, &open).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventually_succeeds() {
        let policy = RetryPolicy::new().with_max_retries(3);
        let counter = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&counter);
        let (result, stats) = retry_async(&policy, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_secs(3));
        assert!(stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let policy = RetryPolicy::new().with_max_retries(3);
        let counter = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&counter);
        let (result, stats) = retry_async(&policy, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(server_error())
            }
        })
        .await;

        assert!(matches!(result, Err(TetherError::Server { status: 500, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(stats.attempts, 4);
        assert!(!stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_attempted_once() {
        let policy = RetryPolicy::new().with_max_retries(3);
        let counter = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&counter);
        let (result, stats) = retry_async(&policy, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TetherError::from_status(400, "invalid").unwrap())
            }
        })
        .await;

        assert!(matches!(result, Err(TetherError::Client { status: 400, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(stats.total_delay, Duration::ZERO);
    }
}
