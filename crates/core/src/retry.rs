use crate::error::{ConfigError, GenerationError};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound on a single attempt, after which it counts as a timeout.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: format!("{} must be a finite value >= 1.0", self.multiplier),
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "retry.attempt_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Each attempt is bounded by `attempt_timeout`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    service: &str,
    mut operation: F,
) -> Result<T, GenerationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(GenerationError::Timeout {
                service: service.to_string(),
                timeout_ms: policy.attempt_timeout.as_millis(),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    service,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient generation failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn connection_error() -> GenerationError {
        GenerationError::Connection {
            service: "test".to_string(),
            details: "connection refused".to_string(),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = with_retry(&policy, "test", |_| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(connection_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= policy.backoff(1) + policy.backoff(2));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = with_retry(&policy, "test", |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GenerationError::Status {
                    service: "test".to_string(),
                    status: 400,
                    body: "bad request".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(GenerationError::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = with_retry(&policy, "test", |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(connection_error())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            attempt_timeout: Duration::from_millis(50),
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = with_retry(&policy, "test", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(GenerationError::Timeout { .. })));
    }
}
