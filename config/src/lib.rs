//! Service settings.
//!
//! Serde-backed structs with `validator` rules, `WARDEN_*` environment
//! overrides, and converters into the `resilience` component configs.

pub mod config;

pub use config::{
    BreakerSettings, CacheSettings, DegradationSettings, RetrySettings, WardenConfig,
};
pub use validator::Validate;
