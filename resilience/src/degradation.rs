//! Degraded-mode service for distributed-cache outages.
//!
//! A background probe watches the cache; when it stops answering, the
//! service flips a process-wide flag and provides bounded in-process
//! stand-ins: an LRU context cache and per-process auth-failure lockout
//! counters. Both are weaker than their shared counterparts and exist only
//! to keep authorization answering during the outage.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use errors::CacheError;
use lru::LruCache;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct DegradationConfig {
    pub probe_interval: Duration,
    pub fallback_capacity: usize,
    /// Failures inside the tracking window before the soft lock applies.
    pub soft_lock_threshold: u32,
    pub soft_lock: Duration,
    pub hard_lock_threshold: u32,
    pub hard_lock: Duration,
    /// Window over which auth failures accumulate before the count resets.
    pub failure_window: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            fallback_capacity: 1000,
            soft_lock_threshold: 5,
            soft_lock: Duration::from_secs(600),
            hard_lock_threshold: 10,
            hard_lock: Duration::from_secs(3600),
            failure_window: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DegradationEvent {
    Entered { reason: String, at: i64 },
    Recovered { at: i64 },
}

/// Liveness check against the distributed cache.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), CacheError>;
}

struct FallbackEntry {
    value: String,
    expires_at: Instant,
}

struct FailureRecord {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Process-wide singleton; the shared degraded flag is read lock-free on
/// every cache access. `start` spawns the probe loop, `stop` ends it.
pub struct DegradationService {
    config: DegradationConfig,
    probe: Arc<dyn HealthProbe>,
    degraded: AtomicBool,
    fallback: Mutex<LruCache<String, FallbackEntry>>,
    lockouts: DashMap<String, FailureRecord>,
    events: broadcast::Sender<DegradationEvent>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DegradationService {
    pub fn new(probe: Arc<dyn HealthProbe>, config: DegradationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.fallback_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            probe,
            degraded: AtomicBool::new(false),
            fallback: Mutex::new(LruCache::new(capacity)),
            lockouts: DashMap::new(),
            events,
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DegradationEvent> {
        self.events.subscribe()
    }

    /// Spawns the probe loop. Idempotent; a second call while running is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let weak = Arc::downgrade(self);
        let interval = self.config.probe_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(service) = weak.upgrade() else { break };
                        service.run_probe().await;
                    }
                    _ = rx.changed() => break,
                }
            }
        }));
        tracing::info!(
            interval_secs = self.config.probe_interval.as_secs(),
            "degradation probe started"
        );
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        tracing::info!("degradation probe stopped");
    }

    /// Clears the fallback cache, the lockout counters and the degraded
    /// flag. The probe loop, if running, keeps running.
    pub fn reset(&self) {
        self.fallback.lock().clear();
        self.lockouts.clear();
        if self.degraded.swap(false, Ordering::SeqCst) {
            gauge!("authz_degraded_mode").set(0.0);
        }
        tracing::info!("degradation service reset");
    }

    async fn run_probe(&self) {
        match self.probe.check().await {
            Ok(()) => self.set_degraded(false, "probe succeeded"),
            Err(err) => self.set_degraded(true, &err.to_string()),
        }
    }

    /// Flips the shared flag, emitting events only on actual transitions.
    /// Public so operators can force the mode during incidents.
    pub fn set_degraded(&self, degraded: bool, reason: &str) {
        let was = self.degraded.swap(degraded, Ordering::SeqCst);
        if was == degraded {
            return;
        }
        let at = chrono::Utc::now().timestamp();
        if degraded {
            gauge!("authz_degraded_mode").set(1.0);
            counter!("authz_degradation_transitions_total", "to" => "degraded").increment(1);
            tracing::warn!(reason = %reason, "distributed cache unreachable, entering degraded mode");
            let _ = self.events.send(DegradationEvent::Entered {
                reason: reason.to_string(),
                at,
            });
        } else {
            gauge!("authz_degraded_mode").set(0.0);
            counter!("authz_degradation_transitions_total", "to" => "healthy").increment(1);
            tracing::info!("distributed cache reachable again, leaving degraded mode");
            let _ = self.events.send(DegradationEvent::Recovered { at });
        }
    }

    // ---- in-process fallback cache ----

    pub fn fallback_get(&self, key: &str) -> Option<String> {
        let mut cache = self.fallback.lock();
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn fallback_put(&self, key: String, value: String, ttl: Duration) {
        let entry = FallbackEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.fallback.lock().put(key, entry);
    }

    pub fn fallback_delete(&self, key: &str) {
        self.fallback.lock().pop(key);
    }

    /// Snapshot of the resident keys, for pattern invalidation while
    /// degraded. Does not touch recency order.
    pub fn fallback_keys(&self) -> Vec<String> {
        self.fallback.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn fallback_len(&self) -> usize {
        self.fallback.lock().len()
    }

    // ---- per-process auth-failure lockouts ----

    /// Records one failed authentication attempt. Returns the lock duration
    /// when this attempt crossed a threshold. Counters live in this process
    /// only, so coordinated attacks across instances see weaker limits than
    /// the shared limiter provides when healthy; the thresholds themselves
    /// are the same.
    pub fn note_auth_failure(&self, principal: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut record = self
            .lockouts
            .entry(principal.to_string())
            .or_insert_with(|| FailureRecord {
                failures: 0,
                window_start: now,
                locked_until: None,
            });

        let lock_expired = record.locked_until.is_none_or(|until| until <= now);
        if lock_expired && now.duration_since(record.window_start) > self.config.failure_window {
            record.failures = 0;
            record.window_start = now;
            record.locked_until = None;
        }

        record.failures += 1;

        let lock = if record.failures >= self.config.hard_lock_threshold {
            Some(self.config.hard_lock)
        } else if record.failures >= self.config.soft_lock_threshold {
            Some(self.config.soft_lock)
        } else {
            None
        };

        if let Some(duration) = lock {
            record.locked_until = Some(now + duration);
            tracing::warn!(
                principal = %principal,
                failures = record.failures,
                lock_secs = duration.as_secs(),
                "auth failure threshold crossed, applying fallback lockout"
            );
        }
        lock
    }

    pub fn lockout_remaining(&self, principal: &str) -> Option<Duration> {
        let record = self.lockouts.get(principal)?;
        let until = record.locked_until?;
        let now = Instant::now();
        if until > now { Some(until - now) } else { None }
    }

    pub fn clear_failures(&self, principal: &str) {
        self.lockouts.remove(principal);
    }
}
