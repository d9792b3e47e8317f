//! Shared test fixtures for the Warden workspace.
//!
//! Everything here is in-memory: seedable implementations of the repository
//! and platform-directory traits, instrumented cache stores, and id helpers.
//! Fixtures are deterministic and hermetic so the suite runs without any
//! external service.

mod fixtures;
mod platform;
mod stores;
mod tenants;

pub use fixtures::*;
pub use platform::*;
pub use stores::*;
pub use tenants::*;
