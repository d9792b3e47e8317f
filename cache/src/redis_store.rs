use std::time::Duration;

use async_trait::async_trait;
use errors::CacheError;
use redis::AsyncCommands;
use resilience::HealthProbe;

use crate::store::CacheStore;

/// Redis-backed store on a shared connection manager. The manager handles
/// reconnection internally; cloning it per call is the supported pattern
/// and keeps this type cheaply shareable.
pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.del(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.exists(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.ttl(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    /// Cursor-based SCAN with MATCH, never KEYS; each round trip returns a
    /// bounded batch so the server stays responsive during invalidation.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Operation(e.to_string()))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Operation(format!(
                "unexpected ping response: {response}"
            )))
        }
    }
}

#[async_trait]
impl HealthProbe for RedisStore {
    async fn check(&self) -> Result<(), CacheError> {
        CacheStore::ping(self).await
    }
}
