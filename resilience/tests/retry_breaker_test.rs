//! Composition of the retrier around the circuit breaker: transient faults
//! are retried, breaker rejections are surfaced immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use errors::DataSourceError;
use resilience::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker, RetryPolicy, retry};

fn map_breaker_err(err: BreakerError<DataSourceError>) -> DataSourceError {
    match err {
        BreakerError::Open { retry_after_ms } => DataSourceError::CircuitOpen { retry_after_ms },
        BreakerError::HalfOpenLimit => DataSourceError::CircuitHalfOpen,
        BreakerError::Inner(inner) => inner,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: false,
        attempt_timeout: Duration::from_secs(1),
    }
}

fn reset_error() -> DataSourceError {
    DataSourceError::Connection {
        source_name: "postgres",
        message: "connection reset".into(),
    }
}

#[tokio::test]
async fn test_transient_faults_are_retried_through_the_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("repo", BreakerConfig::default()));
    let calls = Arc::new(AtomicUsize::new(0));

    let breaker_inner = Arc::clone(&breaker);
    let calls_inner = Arc::clone(&calls);
    let result: Result<&str, DataSourceError> = retry(&fast_policy(), "guarded_op", move || {
        let breaker = Arc::clone(&breaker_inner);
        let calls = Arc::clone(&calls_inner);
        async move {
            breaker
                .execute(move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(reset_error())
                    } else {
                        Ok("done")
                    }
                })
                .await
                .map_err(map_breaker_err)
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // all three attempts were admitted by a closed breaker
    assert_eq!(breaker.stats().total_requests, 3);
    assert_eq!(breaker.stats().total_failures, 2);
}

#[tokio::test]
async fn test_open_breaker_rejections_are_not_retried() {
    let config = BreakerConfig {
        failure_threshold: 2,
        cooldown: Duration::from_secs(60),
        ..BreakerConfig::default()
    };
    let breaker = Arc::new(CircuitBreaker::new("repo", config));

    // trip the breaker
    for _ in 0..2 {
        let _ = breaker
            .execute(|| async { Err::<(), _>(reset_error()) })
            .await;
    }

    let attempts = Arc::new(AtomicUsize::new(0));
    let breaker_inner = Arc::clone(&breaker);
    let attempts_inner = Arc::clone(&attempts);
    let result: Result<(), DataSourceError> = retry(&fast_policy(), "guarded_op", move || {
        let breaker = Arc::clone(&breaker_inner);
        let attempts = Arc::clone(&attempts_inner);
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            breaker
                .execute(|| async { Ok::<(), DataSourceError>(()) })
                .await
                .map_err(map_breaker_err)
        }
    })
    .await;

    // one attempt, rejected without running the operation, no retries
    match result.unwrap_err() {
        DataSourceError::CircuitOpen { retry_after_ms } => assert!(retry_after_ms > 0),
        other => panic!("expected CircuitOpen, got {other}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.stats().total_requests, 2);
}

#[tokio::test]
async fn test_breaker_recovers_through_probe_after_cooldown() {
    let config = BreakerConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(1),
        ..BreakerConfig::default()
    };
    let breaker = CircuitBreaker::new("repo", config);
    let _ = breaker
        .execute(|| async { Err::<(), _>(reset_error()) })
        .await;

    tokio::time::sleep(Duration::from_millis(5)).await;

    let result: Result<&str, DataSourceError> = breaker
        .execute(|| async { Ok("recovered") })
        .await
        .map_err(map_breaker_err);
    assert_eq!(result.unwrap(), "recovered");
}

#[tokio::test]
async fn test_attempt_timeout_on_hung_probe_reopens_breaker() {
    let config = BreakerConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(50),
        ..BreakerConfig::default()
    };
    let breaker = Arc::new(CircuitBreaker::new("repo", config));

    // trip, then wait out the cooldown so the next admission is a probe
    let _ = breaker
        .execute(|| async { Err::<(), _>(reset_error()) })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the per-attempt timeout abandons the hung probe mid-flight
    let policy = RetryPolicy {
        max_retries: 0,
        attempt_timeout: Duration::from_millis(20),
        ..fast_policy()
    };
    let breaker_inner = Arc::clone(&breaker);
    let result: Result<(), DataSourceError> = retry(&policy, "guarded_op", move || {
        let breaker = Arc::clone(&breaker_inner);
        async move {
            breaker
                .execute(|| std::future::pending::<Result<(), DataSourceError>>())
                .await
                .map_err(map_breaker_err)
        }
    })
    .await;
    assert!(matches!(
        result.unwrap_err(),
        DataSourceError::Timeout { .. }
    ));

    // the abandoned probe counts as a probe failure: open, fresh cooldown
    assert_eq!(breaker.state(), BreakerState::Open);
    let rejected = breaker
        .execute(|| async { Ok::<(), DataSourceError>(()) })
        .await;
    assert!(matches!(rejected, Err(BreakerError::Open { .. })));

    // once the dependency recovers, a later probe closes the breaker again
    tokio::time::sleep(Duration::from_millis(100)).await;
    let recovered: Result<&str, DataSourceError> = breaker
        .execute(|| async { Ok("recovered") })
        .await
        .map_err(map_breaker_err);
    assert_eq!(recovered.unwrap(), "recovered");
    assert_eq!(breaker.state(), BreakerState::Closed);
}
