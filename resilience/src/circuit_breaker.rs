//! Circuit breaker for the repository and platform-directory boundary.
//!
//! Trips on consecutive failures or on sustained latency, rejects fast while
//! open, and recovers through a bounded half-open probe. One breaker guards
//! each downstream dependency for the whole process; the per-tenant state
//! lives in the repositories, not here.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling mean latency that trips the breaker even while calls succeed.
    pub latency_threshold: Duration,
    /// Number of recent calls the latency mean is computed over.
    pub latency_window: usize,
    /// Minimum samples in the window before the latency trip can fire, so a
    /// single slow call cannot open the breaker.
    pub latency_min_samples: usize,
    /// Time the breaker stays open before admitting a probe.
    pub cooldown: Duration,
    /// Concurrent probes admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            latency_threshold: Duration::from_millis(3000),
            latency_window: 20,
            latency_min_samples: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BreakerEvent {
    Opened {
        name: String,
        consecutive_failures: u32,
        average_latency_ms: Option<u64>,
        at: i64,
    },
    HalfOpened {
        name: String,
        at: i64,
    },
    Closed {
        name: String,
        at: i64,
    },
}

/// Point-in-time snapshot; reading it never mutates breaker state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub average_latency_ms: Option<u64>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub opened_at: Option<i64>,
    pub recovered_at: Option<i64>,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open, retry after {retry_after_ms}ms")]
    Open { retry_after_ms: u64 },

    #[error("circuit half-open, probe already in flight")]
    HalfOpenLimit,

    #[error("{0}")]
    Inner(E),
}

struct BreakerCore {
    state: BreakerState,
    consecutive_failures: u32,
    latencies_ms: VecDeque<u64>,
    opened_at: Option<Instant>,
    opened_at_epoch: Option<i64>,
    recovered_at_epoch: Option<i64>,
    half_open_in_flight: u32,
    total_requests: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            latencies_ms: VecDeque::new(),
            opened_at: None,
            opened_at_epoch: None,
            recovered_at_epoch: None,
            half_open_in_flight: 0,
            total_requests: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn push_latency(&mut self, latency_ms: u64, window: usize) {
        self.latencies_ms.push_back(latency_ms);
        while self.latencies_ms.len() > window {
            self.latencies_ms.pop_front();
        }
    }

    fn average_latency_ms(&self) -> Option<u64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.latencies_ms.iter().sum();
        Some(sum / self.latencies_ms.len() as u64)
    }
}

enum Admission {
    Normal,
    Probe,
}

enum Rejection {
    Open { retry_after_ms: u64 },
    HalfOpenLimit,
}

/// Token for one admitted in-flight call. Completing the call consumes it
/// through `succeed`/`fail`; dropping it mid-flight records the call as a
/// failure with the elapsed latency, so an abandoned probe reopens the
/// breaker instead of holding the half-open slot.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    started: Instant,
    armed: bool,
}

impl<'a> AdmissionGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            started: Instant::now(),
            armed: true,
        }
    }

    fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn succeed(mut self) {
        self.armed = false;
        self.breaker.record_success(self.latency_ms(), &self.admission);
    }

    fn fail(mut self) {
        self.armed = false;
        self.breaker.record_failure(self.latency_ms(), &self.admission);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let latency_ms = self.latency_ms();
        counter!("authz_breaker_abandoned_total", "breaker" => self.breaker.name.clone())
            .increment(1);
        tracing::debug!(
            breaker = %self.breaker.name,
            latency_ms,
            "in-flight call abandoned, recording failure"
        );
        self.breaker.record_failure(latency_ms, &self.admission);
    }
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Runs `operation` if the breaker admits it, recording its outcome and
    /// latency. Rejections return before the operation future is built. A
    /// call dropped mid-flight (a caller-side timeout or task abort) is
    /// recorded as a failure with the elapsed latency, and an abandoned
    /// probe returns the breaker to open with a fresh cooldown.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let guard = match self.admit() {
            Ok(admission) => AdmissionGuard::new(self, admission),
            Err(Rejection::Open { retry_after_ms }) => {
                return Err(BreakerError::Open { retry_after_ms });
            }
            Err(Rejection::HalfOpenLimit) => return Err(BreakerError::HalfOpenLimit),
        };

        match operation().await {
            Ok(value) => {
                guard.succeed();
                Ok(value)
            }
            Err(err) => {
                guard.fail();
                Err(BreakerError::Inner(err))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.core.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let core = self.core.lock();
        BreakerStats {
            name: self.name.clone(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            average_latency_ms: core.average_latency_ms(),
            total_requests: core.total_requests,
            total_failures: core.total_failures,
            total_rejections: core.total_rejections,
            opened_at: core.opened_at_epoch,
            recovered_at: core.recovered_at_epoch,
        }
    }

    /// Restores a pristine closed breaker. Administrative; emits no event.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        *core = BreakerCore::new();
        drop(core);
        tracing::info!(breaker = %self.name, "circuit breaker reset");
    }

    fn admit(&self) -> Result<Admission, Rejection> {
        let mut core = self.core.lock();
        match core.state {
            BreakerState::Closed => {
                core.total_requests += 1;
                Ok(Admission::Normal)
            }
            BreakerState::Open => {
                let elapsed = core
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    core.state = BreakerState::HalfOpen;
                    core.half_open_in_flight = 1;
                    core.total_requests += 1;
                    drop(core);
                    self.emit_half_opened();
                    Ok(Admission::Probe)
                } else {
                    core.total_rejections += 1;
                    let retry_after_ms =
                        (self.config.cooldown - elapsed).as_millis() as u64;
                    Err(Rejection::Open { retry_after_ms })
                }
            }
            BreakerState::HalfOpen => {
                if core.half_open_in_flight < self.config.half_open_max_probes {
                    core.half_open_in_flight += 1;
                    core.total_requests += 1;
                    Ok(Admission::Probe)
                } else {
                    core.total_rejections += 1;
                    Err(Rejection::HalfOpenLimit)
                }
            }
        }
    }

    fn record_success(&self, latency_ms: u64, admission: &Admission) {
        let mut core = self.core.lock();
        core.push_latency(latency_ms, self.config.latency_window);

        match (core.state, admission) {
            (BreakerState::HalfOpen, Admission::Probe) => {
                core.state = BreakerState::Closed;
                core.consecutive_failures = 0;
                core.half_open_in_flight = 0;
                core.latencies_ms.clear();
                core.recovered_at_epoch = Some(chrono::Utc::now().timestamp());
                drop(core);
                self.emit_closed();
            }
            (BreakerState::Closed, _) => {
                core.consecutive_failures = 0;
                if let Some(avg) = self.latency_trip(&core) {
                    self.trip_open(&mut core, Some(avg));
                }
            }
            // A late result after a reset or concurrent transition; the
            // latency sample was recorded, nothing else to do.
            _ => {}
        }
    }

    fn record_failure(&self, latency_ms: u64, admission: &Admission) {
        let mut core = self.core.lock();
        core.total_failures += 1;
        core.push_latency(latency_ms, self.config.latency_window);

        match (core.state, admission) {
            (BreakerState::HalfOpen, Admission::Probe) => {
                self.trip_open(&mut core, None);
            }
            (BreakerState::Closed, _) => {
                core.consecutive_failures += 1;
                let latency_avg = self.latency_trip(&core);
                if core.consecutive_failures >= self.config.failure_threshold
                    || latency_avg.is_some()
                {
                    self.trip_open(&mut core, latency_avg);
                }
            }
            _ => {}
        }
    }

    fn latency_trip(&self, core: &BreakerCore) -> Option<u64> {
        if core.latencies_ms.len() < self.config.latency_min_samples {
            return None;
        }
        core.average_latency_ms()
            .filter(|avg| *avg > self.config.latency_threshold.as_millis() as u64)
    }

    fn trip_open(&self, core: &mut parking_lot::MutexGuard<'_, BreakerCore>, avg: Option<u64>) {
        let consecutive = core.consecutive_failures;
        core.state = BreakerState::Open;
        core.opened_at = Some(Instant::now());
        core.opened_at_epoch = Some(chrono::Utc::now().timestamp());
        core.half_open_in_flight = 0;

        counter!("authz_breaker_transitions_total", "breaker" => self.name.clone(), "to" => "open")
            .increment(1);
        tracing::warn!(
            breaker = %self.name,
            consecutive_failures = consecutive,
            average_latency_ms = avg,
            "circuit breaker opened"
        );
        let _ = self.events.send(BreakerEvent::Opened {
            name: self.name.clone(),
            consecutive_failures: consecutive,
            average_latency_ms: avg,
            at: chrono::Utc::now().timestamp(),
        });
    }

    fn emit_half_opened(&self) {
        counter!("authz_breaker_transitions_total", "breaker" => self.name.clone(), "to" => "halfOpen")
            .increment(1);
        tracing::info!(breaker = %self.name, "circuit breaker half-open, admitting probe");
        let _ = self.events.send(BreakerEvent::HalfOpened {
            name: self.name.clone(),
            at: chrono::Utc::now().timestamp(),
        });
    }

    fn emit_closed(&self) {
        counter!("authz_breaker_transitions_total", "breaker" => self.name.clone(), "to" => "closed")
            .increment(1);
        tracing::info!(breaker = %self.name, "circuit breaker closed after successful probe");
        let _ = self.events.send(BreakerEvent::Closed {
            name: self.name.clone(),
            at: chrono::Utc::now().timestamp(),
        });
    }
}
