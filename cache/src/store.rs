use std::time::Duration;

use async_trait::async_trait;
use errors::CacheError;

/// Backend contract for the context cache. Keys are plain strings so
/// pattern invalidation can scan them; values are serialized envelopes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remaining TTL in seconds; negative values follow the Redis
    /// convention (-2 missing key, -1 no expiry).
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Keys matching a `*` glob pattern. Implementations must not block the
    /// backend while enumerating.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
