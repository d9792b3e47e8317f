use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use resilience::DegradationService;
use warden_core::{AuthorizationContext, CacheKey, ContextOrigin, TenantId, UserId};

use crate::memory_store::glob_match;
use crate::store::CacheStore;

/// Bumped whenever the serialized context shape changes. Entries written
/// under another version are discarded on read instead of being
/// deserialized into a mismatched struct.
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_KEY_PREFIX: &str = "authz:ctx";
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedEnvelope {
    version: u32,
    cached_at: i64,
    ttl_secs: u64,
    context: AuthorizationContext,
}

/// Context cache over a [`CacheStore`]. Every read re-validates that the
/// entry's embedded identity matches the key it was fetched under; a
/// mismatch is treated as a poisoned entry and surfaced as a security
/// signal, never returned to the caller.
///
/// Store failures degrade to misses on read and are swallowed on write.
/// A resolution must never fail because the cache is away.
pub struct AuthorizationCache {
    store: Arc<dyn CacheStore>,
    degradation: Option<Arc<DegradationService>>,
    prefix: String,
    default_ttl: Duration,
}

impl AuthorizationCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            degradation: None,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_CONTEXT_TTL,
        }
    }

    /// Routes reads and writes through the degradation service's local
    /// fallback whenever the distributed store is marked unreachable.
    pub fn with_degradation(mut self, service: Arc<DegradationService>) -> Self {
        self.degradation = Some(service);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn storage_key(&self, key: &CacheKey) -> String {
        key.storage_key(&self.prefix)
    }

    fn is_degraded(&self) -> bool {
        self.degradation
            .as_ref()
            .is_some_and(|service| service.is_degraded())
    }

    pub async fn get_context(&self, key: &CacheKey) -> Option<AuthorizationContext> {
        let storage_key = key.storage_key(&self.prefix);

        let raw = if self.is_degraded() {
            self.degradation
                .as_ref()
                .and_then(|service| service.fallback_get(&storage_key))
        } else {
            match self.store.get(&storage_key).await {
                Ok(raw) => raw,
                Err(err) => {
                    counter!("authz_cache_errors_total", "op" => "get").increment(1);
                    warn!(key = %storage_key, error = %err, "context cache read failed");
                    return None;
                }
            }
        };
        let raw = raw?;

        let envelope: CachedEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(key = %storage_key, error = %err, "discarding undecodable cache entry");
                self.discard(&storage_key).await;
                return None;
            }
        };

        if envelope.version != CONTEXT_SCHEMA_VERSION {
            debug!(
                key = %storage_key,
                found = envelope.version,
                expected = CONTEXT_SCHEMA_VERSION,
                "discarding cache entry from another schema version"
            );
            self.discard(&storage_key).await;
            return None;
        }

        // The store's own TTL normally handles expiry; this guards entries
        // that outlived it, e.g. fallback copies or a store with persistence
        // misconfigured.
        let now = Utc::now().timestamp();
        if envelope.cached_at + envelope.ttl_secs as i64 <= now {
            self.discard(&storage_key).await;
            return None;
        }

        if !key.matches_context(&envelope.context) {
            counter!("authz_cache_integrity_violations_total").increment(1);
            error!(
                key = %storage_key,
                expected_tenant = %key.tenant_id,
                expected_user = %key.user_id,
                actual_tenant = %envelope.context.tenant_id,
                actual_user = %envelope.context.user_id,
                "cache entry identity mismatch, dropping poisoned entry"
            );
            self.discard(&storage_key).await;
            return None;
        }

        counter!("authz_cache_hits_total").increment(1);
        let mut context = envelope.context;
        context.source.origin = ContextOrigin::Cache;
        context.source.ttl_secs = envelope.ttl_secs;
        Some(context)
    }

    /// Writes a resolved context. Refuses to store a context whose identity
    /// does not match the key; that is the write-side half of the identity
    /// check and indicates a resolver bug rather than cache corruption.
    pub async fn set_context(
        &self,
        key: &CacheKey,
        context: &AuthorizationContext,
        ttl: Option<Duration>,
    ) {
        if !key.matches_context(context) {
            counter!("authz_cache_integrity_violations_total").increment(1);
            error!(
                expected_tenant = %key.tenant_id,
                expected_user = %key.user_id,
                actual_tenant = %context.tenant_id,
                actual_user = %context.user_id,
                "refusing to cache context under mismatched key"
            );
            return;
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let envelope = CachedEnvelope {
            version: CONTEXT_SCHEMA_VERSION,
            cached_at: Utc::now().timestamp(),
            ttl_secs: ttl.as_secs(),
            context: context.clone(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "context serialization failed, skipping cache write");
                return;
            }
        };

        let storage_key = key.storage_key(&self.prefix);
        if self.is_degraded() {
            if let Some(service) = &self.degradation {
                service.fallback_put(storage_key, payload, ttl);
            }
            return;
        }
        if let Err(err) = self.store.set_ex(&storage_key, &payload, ttl).await {
            counter!("authz_cache_errors_total", "op" => "set").increment(1);
            warn!(key = %storage_key, error = %err, "context cache write failed");
        }
    }

    pub async fn delete_context(&self, key: &CacheKey) {
        let storage_key = key.storage_key(&self.prefix);
        self.discard(&storage_key).await;
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        let storage_key = key.storage_key(&self.prefix);
        if self.is_degraded() {
            return self
                .degradation
                .as_ref()
                .is_some_and(|service| service.fallback_get(&storage_key).is_some());
        }
        match self.store.exists(&storage_key).await {
            Ok(found) => found,
            Err(err) => {
                counter!("authz_cache_errors_total", "op" => "exists").increment(1);
                warn!(key = %storage_key, error = %err, "cache existence probe failed");
                false
            }
        }
    }

    /// Remaining store TTL, `None` when the entry is absent, unexpiring, or
    /// the store cannot answer.
    pub async fn get_ttl(&self, key: &CacheKey) -> Option<Duration> {
        if self.is_degraded() {
            return None;
        }
        let storage_key = key.storage_key(&self.prefix);
        match self.store.ttl(&storage_key).await {
            Ok(secs) if secs >= 0 => Some(Duration::from_secs(secs as u64)),
            Ok(_) => None,
            Err(err) => {
                warn!(key = %storage_key, error = %err, "cache ttl probe failed");
                None
            }
        }
    }

    pub async fn update_ttl(&self, key: &CacheKey, ttl: Duration) -> bool {
        if self.is_degraded() {
            return false;
        }
        let storage_key = key.storage_key(&self.prefix);
        match self.store.expire(&storage_key, ttl).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(key = %storage_key, error = %err, "cache ttl update failed");
                false
            }
        }
    }

    /// Drops every cached context for the tenant. Returns the number of
    /// entries removed.
    pub async fn invalidate_tenant(&self, tenant_id: &TenantId) -> u64 {
        let pattern = format!("{}:{}:*", self.prefix, tenant_id);
        self.invalidate_pattern(&pattern, "tenant").await
    }

    /// Drops the user's cached contexts across all tenants, for global
    /// account events such as deactivation.
    pub async fn invalidate_user(&self, user_id: &UserId) -> u64 {
        let pattern = format!("{}:*:{}:*", self.prefix, user_id);
        self.invalidate_pattern(&pattern, "user").await
    }

    pub async fn invalidate_user_in_tenant(&self, tenant_id: &TenantId, user_id: &UserId) -> u64 {
        let pattern = format!("{}:{}:{}:*", self.prefix, tenant_id, user_id);
        self.invalidate_pattern(&pattern, "tenantUser").await
    }

    async fn invalidate_pattern(&self, pattern: &str, scope: &'static str) -> u64 {
        let mut removed = 0u64;
        if self.is_degraded() {
            if let Some(service) = &self.degradation {
                for key in service.fallback_keys() {
                    if glob_match(pattern, &key) {
                        service.fallback_delete(&key);
                        removed += 1;
                    }
                }
            }
        } else {
            let keys = match self.store.scan(pattern).await {
                Ok(keys) => keys,
                Err(err) => {
                    counter!("authz_cache_errors_total", "op" => "scan").increment(1);
                    warn!(pattern = %pattern, error = %err, "cache invalidation scan failed");
                    return 0;
                }
            };
            for key in keys {
                match self.store.delete(&key).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        counter!("authz_cache_errors_total", "op" => "delete").increment(1);
                        warn!(key = %key, error = %err, "cache invalidation delete failed");
                    }
                }
                if let Some(service) = &self.degradation {
                    service.fallback_delete(&key);
                }
            }
        }
        if removed > 0 {
            counter!("authz_cache_invalidations_total", "scope" => scope).increment(removed);
            debug!(pattern = %pattern, removed, "invalidated cached contexts");
        }
        removed
    }

    async fn discard(&self, storage_key: &str) {
        if let Some(service) = &self.degradation {
            service.fallback_delete(storage_key);
        }
        if self.is_degraded() {
            return;
        }
        if let Err(err) = self.store.delete(storage_key).await {
            counter!("authz_cache_errors_total", "op" => "delete").increment(1);
            warn!(key = %storage_key, error = %err, "failed to drop cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use warden_core::{ContextSource, SourceMap, UserId};

    fn context(tenant: &str, user: &str) -> AuthorizationContext {
        AuthorizationContext {
            user_id: UserId::new(user.to_string()).unwrap(),
            tenant_id: TenantId::new(tenant.to_string()).unwrap(),
            institution_id: None,
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            plan_id: None,
            features: BTreeSet::new(),
            source: ContextSource {
                origin: ContextOrigin::Fresh,
                resolved_at: Utc::now().timestamp(),
                ttl_secs: 600,
            },
            source_map: SourceMap::default(),
        }
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = CachedEnvelope {
            version: CONTEXT_SCHEMA_VERSION,
            cached_at: 1_700_000_000,
            ttl_secs: 600,
            context: context("t1", "u1"),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["cachedAt"], 1_700_000_000);
        assert_eq!(json["ttlSecs"], 600);
        assert_eq!(json["context"]["tenantId"], "t1");
    }
}
