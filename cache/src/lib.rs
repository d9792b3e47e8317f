//! Distributed cache layer for resolved authorization contexts.
//!
//! [`store::CacheStore`] abstracts the backend; [`redis_store::RedisStore`]
//! is the production implementation and [`memory_store::MemoryStore`] backs
//! tests and single-process deployments. [`context_cache::AuthorizationCache`]
//! adds the context envelope, TTLs, identity validation and invalidation on
//! top, and routes through the degraded-mode fallback when the distributed
//! store is unreachable.

pub mod context_cache;
pub mod memory_store;
pub mod redis_store;
pub mod revocation;
pub mod store;

pub use context_cache::{AuthorizationCache, CONTEXT_SCHEMA_VERSION};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use revocation::{MarkerWrite, RevocationMarkers};
pub use store::CacheStore;
