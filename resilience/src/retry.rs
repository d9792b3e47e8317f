//! Bounded retry with exponential backoff and per-attempt timeouts.
//!
//! Only transient failures are retried; everything else aborts on the first
//! attempt. When attempts are exhausted the caller gets the last underlying
//! error back unchanged, never a wrapper.

use std::time::Duration;

use errors::{CacheError, DataSourceError};
use metrics::counter;

/// Classification hooks the retrier needs from an error type. Implemented
/// here for the workspace taxonomy so call sites stay declarative.
pub trait TransientError {
    fn is_transient(&self) -> bool;

    /// Builds the error reported when a single attempt exceeds its timeout.
    fn attempt_timed_out(timeout: Duration) -> Self;
}

impl TransientError for DataSourceError {
    fn is_transient(&self) -> bool {
        DataSourceError::is_transient(self)
    }

    fn attempt_timed_out(timeout: Duration) -> Self {
        DataSourceError::Timeout {
            elapsed_ms: timeout.as_millis() as u64,
        }
    }
}

impl TransientError for CacheError {
    fn is_transient(&self) -> bool {
        matches!(self, CacheError::Connection(_) | CacheError::Operation(_))
    }

    fn attempt_timed_out(timeout: Duration) -> Self {
        CacheError::Operation(format!("timed out after {}ms", timeout.as_millis()))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f32,
    pub jitter: bool,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::database()
    }
}

impl RetryPolicy {
    /// Profile for tenant repositories and the platform directory.
    pub fn database() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Tighter profile for cache operations, which have a fallback anyway.
    pub fn cache() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(150),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
            attempt_timeout: Duration::from_millis(800),
        }
    }

    /// Backoff before retry number `attempt` (1-based), without jitter:
    /// `min(max_delay, initial_delay * multiplier^(attempt - 1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_millis() as f32 * self.multiplier.powi(exponent);
        Duration::from_millis(scaled as u64).min(self.max_delay)
    }
}

/// Retries `operation` under `policy`, classifying failures with
/// `is_transient`. `on_timeout` synthesizes the error for an attempt that
/// outlives `policy.attempt_timeout`.
pub async fn retry_with<T, E, F, Fut, C, M>(
    policy: &RetryPolicy,
    op_name: &'static str,
    is_transient: C,
    on_timeout: M,
    operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    M: Fn(Duration) -> E,
{
    let mut last_error = None;
    let mut backoff = policy.initial_delay;

    for attempt in 0..=policy.max_retries {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    counter!("authz_retry_recoveries_total", "operation" => op_name).increment(1);
                }
                return Ok(value);
            }
            Err(err) => {
                let transient = is_transient(&err);
                tracing::debug!(
                    operation = op_name,
                    attempt = attempt + 1,
                    transient,
                    error = %err,
                    "operation attempt failed"
                );
                last_error = Some(err);

                if attempt == policy.max_retries || !transient {
                    break;
                }

                counter!("authz_retries_total", "operation" => op_name).increment(1);

                let mut delay = backoff;
                if policy.jitter {
                    let jitter = rand::random::<f32>() + 0.5;
                    delay = Duration::from_millis((delay.as_millis() as f32 * jitter) as u64);
                }
                tokio::time::sleep(delay).await;

                backoff = Duration::from_millis(
                    (backoff.as_millis() as f32 * policy.multiplier) as u64,
                )
                .min(policy.max_delay);
            }
        }
    }

    // last_error is always set by the loop; the fallback only guards the
    // degenerate policy with zero attempts.
    match last_error {
        Some(err) => Err(err),
        None => Err(on_timeout(policy.attempt_timeout)),
    }
}

/// Trait-driven form of [`retry_with`].
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &'static str,
    operation: F,
) -> Result<T, E>
where
    E: TransientError + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    retry_with(
        policy,
        op_name,
        TransientError::is_transient,
        E::attempt_timed_out,
        operation,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: false,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_shape() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::database()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // capped at max_delay
        assert_eq!(policy.delay_for(10), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<&str, DataSourceError> =
            retry(&fast_policy(), "test_op", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DataSourceError::Connection {
                            source_name: "postgres",
                            message: "connection reset".into(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), DataSourceError> = retry(&fast_policy(), "test_op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DataSourceError::Query {
                    source_name: "postgres",
                    message: "syntax error".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_original_error() {
        let result: Result<(), DataSourceError> = retry(&fast_policy(), "test_op", || async {
            Err(DataSourceError::Connection {
                source_name: "postgres",
                message: "connection refused by 10.0.0.7".into(),
            })
        })
        .await;

        match result.unwrap_err() {
            DataSourceError::Connection { message, .. } => {
                assert_eq!(message, "connection refused by 10.0.0.7");
            }
            other => panic!("expected the original connection error, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_classified_transient() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy {
            max_retries: 1,
            attempt_timeout: Duration::from_millis(50),
            jitter: false,
            ..fast_policy()
        };

        let result: Result<(), DataSourceError> = retry(&policy, "test_op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            DataSourceError::Timeout { elapsed_ms: 50 }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
