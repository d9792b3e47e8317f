//! Resilience primitives for the data boundary: bounded retries with
//! exponential backoff, a latency-aware circuit breaker, and the
//! degraded-mode service that covers for an unreachable distributed cache.

pub mod circuit_breaker;
pub mod degradation;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerState, BreakerStats, CircuitBreaker,
};
pub use degradation::{DegradationConfig, DegradationEvent, DegradationService, HealthProbe};
pub use retry::{RetryPolicy, TransientError, retry, retry_with};
