use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use cache::{CacheStore, MemoryStore};
use errors::CacheError;
use resilience::HealthProbe;

/// In-memory store that counts every backend operation, for asserting that
/// a code path did (or did not) touch the cache.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
    exists_checks: AtomicUsize,
    ttls: AtomicUsize,
    expires: AtomicUsize,
    scans: AtomicUsize,
    pings: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Every operation except pings, which health probes issue on their own
    /// schedule.
    pub fn total_ops(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
            + self.sets.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.exists_checks.load(Ordering::SeqCst)
            + self.ttls.load(Ordering::SeqCst)
            + self.expires.load(Ordering::SeqCst)
            + self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.ttls.fetch_add(1, Ordering::SeqCst);
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.expires.fetch_add(1, Ordering::SeqCst);
        self.inner.expire(key, ttl).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(pattern).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.inner.ping().await
    }
}

#[async_trait]
impl HealthProbe for CountingStore {
    async fn check(&self) -> Result<(), CacheError> {
        CacheStore::ping(self).await
    }
}

/// In-memory store with a failure switch. While failing, every operation
/// (pings included) returns a connection error, so it can drive both the
/// error paths of callers and a health probe into degraded mode.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Operations refused since construction.
    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gate()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.gate()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.gate()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.gate()?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.gate()?;
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.gate()?;
        self.inner.expire(key, ttl).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.gate()?;
        self.inner.scan(pattern).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.gate()?;
        self.inner.ping().await
    }
}

#[async_trait]
impl HealthProbe for FailingStore {
    async fn check(&self) -> Result<(), CacheError> {
        CacheStore::ping(self).await
    }
}
