//! Resolution pipeline and authorization queries.
//!
//! [`resolver::AuthorizationResolver`] turns a (user, tenant) pair into an
//! [`warden_core::AuthorizationContext`] by loading role assignments,
//! overrides, delegations, plan ceilings and feature grants through
//! tenant-scoped repositories, with retries and a circuit breaker at the
//! data boundary and the context cache in front. [`engine`] answers
//! permission questions against a resolved context without further I/O;
//! [`features`] evaluates rollout flags and the module tree.

pub mod engine;
pub mod features;
pub mod resolver;

pub use engine::{AuthorizationEngine, CheckReport, CheckRequest};
pub use features::{ModuleTree, active_feature_permissions, flag_enabled};
pub use resolver::{AuthorizationResolver, Resolution, ResolverSettings};
