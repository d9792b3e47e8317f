//! Settings structs for the authorization service.
//!
//! Every section deserializes with full defaults so an empty document is a
//! valid configuration. Validation runs through the `validator` derive;
//! call [`WardenConfig::detect_env`] to fold in environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use resilience::{BreakerConfig, DegradationConfig, RetryPolicy};

/// Top-level settings, one section per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WardenConfig {
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,

    /// Retry profile for tenant repositories and the platform directory.
    #[serde(default)]
    #[validate(nested)]
    pub database_retry: RetrySettings,

    /// Retry profile for cache maintenance jobs. The cache's own read and
    /// write paths fail soft instead of retrying.
    #[serde(default = "RetrySettings::cache")]
    #[validate(nested)]
    pub cache_retry: RetrySettings,

    #[serde(default)]
    #[validate(nested)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    #[validate(nested)]
    pub degradation: DegradationSettings,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            database_retry: RetrySettings::database(),
            cache_retry: RetrySettings::cache(),
            breaker: BreakerSettings::default(),
            degradation: DegradationSettings::default(),
        }
    }
}

impl WardenConfig {
    /// Defaults overridden by `WARDEN_*` environment variables. Unparsable
    /// numeric values are ignored rather than failing startup.
    pub fn detect_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WARDEN_REDIS_URL") {
            config.cache.redis_url = Some(url);
        }
        if let Some(ttl) = env_parse::<u64>("WARDEN_CACHE_TTL_SECS") {
            config.cache.ttl_secs = ttl;
        }
        if let Some(interval) = env_parse::<u64>("WARDEN_PROBE_INTERVAL_SECS") {
            config.degradation.probe_interval_secs = interval;
        }
        if let Some(cooldown) = env_parse::<u64>("WARDEN_BREAKER_COOLDOWN_SECS") {
            config.breaker.cooldown_secs = cooldown;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

/// Context cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheSettings {
    /// Redis connection string; unset selects the in-process store.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Lifetime of a cached context in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub ttl_secs: u64,

    /// Namespace prepended to every storage key.
    #[serde(default = "default_key_prefix")]
    #[validate(length(min = 1, max = 64), custom(function = "validate_key_prefix"))]
    pub key_prefix: String,
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_key_prefix() -> String {
    "authz:ctx".to_string()
}

// Prefixes embed into colon-delimited keys and scan patterns; a trailing
// colon would double up and a `*` would widen every invalidation scan.
fn validate_key_prefix(value: &str) -> Result<(), ValidationError> {
    let clean = !value.contains(|c: char| c.is_whitespace() || c == '*');
    if clean && !value.ends_with(':') {
        Ok(())
    } else {
        Err(ValidationError::new("invalid cache key prefix"))
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: default_cache_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Retry profile in wire-friendly units; converts into
/// [`resilience::RetryPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 0, max = 10))]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1, max = 120_000))]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f32,

    #[serde(default = "default_jitter")]
    pub jitter: bool,

    #[serde(default = "default_attempt_timeout_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_multiplier() -> f32 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::database()
    }
}

impl RetrySettings {
    /// Mirrors [`RetryPolicy::database`].
    pub fn database() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }

    /// Mirrors [`RetryPolicy::cache`].
    pub fn cache() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 150,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: true,
            attempt_timeout_ms: 800,
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }
}

/// Circuit breaker settings; converts into [`resilience::BreakerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1, max = 100))]
    pub failure_threshold: u32,

    #[serde(default = "default_latency_threshold_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub latency_threshold_ms: u64,

    #[serde(default = "default_latency_window")]
    #[validate(range(min = 1, max = 1_000))]
    pub latency_window: usize,

    #[serde(default = "default_latency_min_samples")]
    #[validate(range(min = 1, max = 100))]
    pub latency_min_samples: usize,

    #[serde(default = "default_cooldown_secs")]
    #[validate(range(min = 1, max = 3_600))]
    pub cooldown_secs: u64,

    #[serde(default = "default_half_open_max_probes")]
    #[validate(range(min = 1, max = 10))]
    pub half_open_max_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_latency_threshold_ms() -> u64 {
    3_000
}

fn default_latency_window() -> usize {
    20
}

fn default_latency_min_samples() -> usize {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_half_open_max_probes() -> u32 {
    1
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            latency_threshold_ms: default_latency_threshold_ms(),
            latency_window: default_latency_window(),
            latency_min_samples: default_latency_min_samples(),
            cooldown_secs: default_cooldown_secs(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            latency_threshold: Duration::from_millis(self.latency_threshold_ms),
            latency_window: self.latency_window,
            latency_min_samples: self.latency_min_samples,
            cooldown: Duration::from_secs(self.cooldown_secs),
            half_open_max_probes: self.half_open_max_probes,
        }
    }
}

/// Degraded-mode settings; converts into [`resilience::DegradationConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DegradationSettings {
    #[serde(default = "default_probe_interval_secs")]
    #[validate(range(min = 1, max = 3_600))]
    pub probe_interval_secs: u64,

    /// Entries the in-process fallback store holds while degraded.
    #[serde(default = "default_fallback_capacity")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub fallback_capacity: usize,

    #[serde(default = "default_soft_lock_threshold")]
    #[validate(range(min = 1, max = 100))]
    pub soft_lock_threshold: u32,

    #[serde(default = "default_soft_lock_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub soft_lock_secs: u64,

    #[serde(default = "default_hard_lock_threshold")]
    #[validate(range(min = 1, max = 1_000))]
    pub hard_lock_threshold: u32,

    #[serde(default = "default_hard_lock_secs")]
    #[validate(range(min = 1, max = 604_800))]
    pub hard_lock_secs: u64,

    /// Window over which repeated auth failures accumulate while degraded.
    #[serde(default = "default_failure_window_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub failure_window_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_fallback_capacity() -> usize {
    1_000
}

fn default_soft_lock_threshold() -> u32 {
    5
}

fn default_soft_lock_secs() -> u64 {
    600
}

fn default_hard_lock_threshold() -> u32 {
    10
}

fn default_hard_lock_secs() -> u64 {
    3_600
}

fn default_failure_window_secs() -> u64 {
    900
}

impl Default for DegradationSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            fallback_capacity: default_fallback_capacity(),
            soft_lock_threshold: default_soft_lock_threshold(),
            soft_lock_secs: default_soft_lock_secs(),
            hard_lock_threshold: default_hard_lock_threshold(),
            hard_lock_secs: default_hard_lock_secs(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

impl DegradationSettings {
    pub fn to_degradation(&self) -> DegradationConfig {
        DegradationConfig {
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            fallback_capacity: self.fallback_capacity,
            soft_lock_threshold: self.soft_lock_threshold,
            soft_lock: Duration::from_secs(self.soft_lock_secs),
            hard_lock_threshold: self.hard_lock_threshold,
            hard_lock: Duration::from_secs(self.hard_lock_secs),
            failure_window: Duration::from_secs(self.failure_window_secs),
        }
    }
}
