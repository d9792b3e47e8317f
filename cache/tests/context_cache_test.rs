use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cache::revocation::MarkerWrite;
use cache::{AuthorizationCache, CacheStore, MemoryStore, RevocationMarkers};
use resilience::{DegradationConfig, DegradationService};
use warden_core::{
    AuthorizationContext, CacheKey, ContextOrigin, ContextSource, PermissionKey, RoleId,
    SourceMap, TenantId, UserId,
};

fn tenant(id: &str) -> TenantId {
    TenantId::new(id.to_string()).unwrap()
}

fn user(id: &str) -> UserId {
    UserId::new(id.to_string()).unwrap()
}

fn key_for(t: &str, u: &str) -> CacheKey {
    CacheKey::new(tenant(t), user(u))
}

fn context_for(t: &str, u: &str) -> AuthorizationContext {
    AuthorizationContext {
        user_id: user(u),
        tenant_id: tenant(t),
        institution_id: None,
        roles: [RoleId::new("teacher".to_string()).unwrap()].into(),
        permissions: [
            PermissionKey::new("students.view").unwrap(),
            PermissionKey::new("attendance.mark").unwrap(),
        ]
        .into(),
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

fn cache_over(store: Arc<MemoryStore>) -> AuthorizationCache {
    AuthorizationCache::new(store)
}

fn degradable_cache(store: Arc<MemoryStore>) -> (AuthorizationCache, Arc<DegradationService>) {
    let service = Arc::new(DegradationService::new(
        store.clone(),
        DegradationConfig::default(),
    ));
    let cache = AuthorizationCache::new(store).with_degradation(service.clone());
    (cache, service)
}

#[tokio::test]
async fn test_round_trip_marks_origin_cache() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let key = key_for("t1", "u1");
    let ctx = context_for("t1", "u1");

    assert!(cache.get_context(&key).await.is_none());

    cache.set_context(&key, &ctx, None).await;
    let cached = cache.get_context(&key).await.expect("entry should be cached");

    assert_eq!(cached.source.origin, ContextOrigin::Cache);
    assert_eq!(cached.source.resolved_at, ctx.source.resolved_at);
    assert_eq!(cached.permissions, ctx.permissions);
    assert_eq!(cached.roles, ctx.roles);
}

#[tokio::test]
async fn test_tenant_mismatch_is_discarded_as_poisoned() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    // Entry filed under t2's key but carrying t1's context, as a
    // misbehaving writer would produce.
    let poisoned_key = key_for("t2", "u1");
    let foreign_ctx = context_for("t1", "u1");
    let envelope = serde_json::json!({
        "version": 1,
        "cachedAt": Utc::now().timestamp(),
        "ttlSecs": 600,
        "context": serde_json::to_value(&foreign_ctx).unwrap(),
    });
    let storage_key = poisoned_key.storage_key("authz:ctx");
    store
        .set_ex(&storage_key, &envelope.to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(cache.get_context(&poisoned_key).await.is_none());
    // The poisoned entry must be gone, not just skipped.
    assert_eq!(store.get(&storage_key).await.unwrap(), None);
}

#[tokio::test]
async fn test_write_side_identity_check_refuses_mismatch() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    let key = key_for("t2", "u1");
    let ctx = context_for("t1", "u1");
    cache.set_context(&key, &ctx, None).await;

    assert!(!cache.exists(&key).await);
    assert!(cache.get_context(&key).await.is_none());
}

#[tokio::test]
async fn test_schema_version_mismatch_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let key = key_for("t1", "u1");

    let envelope = serde_json::json!({
        "version": 99,
        "cachedAt": Utc::now().timestamp(),
        "ttlSecs": 600,
        "context": serde_json::to_value(&context_for("t1", "u1")).unwrap(),
    });
    let storage_key = key.storage_key("authz:ctx");
    store
        .set_ex(&storage_key, &envelope.to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(cache.get_context(&key).await.is_none());
    assert_eq!(store.get(&storage_key).await.unwrap(), None);
}

#[tokio::test]
async fn test_undecodable_entry_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let key = key_for("t1", "u1");
    let storage_key = key.storage_key("authz:ctx");

    store
        .set_ex(&storage_key, "{not json", Duration::from_secs(60))
        .await
        .unwrap();

    assert!(cache.get_context(&key).await.is_none());
    assert_eq!(store.get(&storage_key).await.unwrap(), None);
}

#[tokio::test]
async fn test_envelope_past_its_own_ttl_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let key = key_for("t1", "u1");

    // Store-level TTL is still generous; the envelope itself is stale.
    let envelope = serde_json::json!({
        "version": 1,
        "cachedAt": Utc::now().timestamp() - 3600,
        "ttlSecs": 600,
        "context": serde_json::to_value(&context_for("t1", "u1")).unwrap(),
    });
    let storage_key = key.storage_key("authz:ctx");
    store
        .set_ex(&storage_key, &envelope.to_string(), Duration::from_secs(3600))
        .await
        .unwrap();

    assert!(cache.get_context(&key).await.is_none());
}

#[tokio::test]
async fn test_invalidate_tenant_leaves_other_tenants_alone() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    for (t, u) in [("t1", "u1"), ("t1", "u2"), ("t2", "u1")] {
        cache
            .set_context(&key_for(t, u), &context_for(t, u), None)
            .await;
    }

    let removed = cache.invalidate_tenant(&tenant("t1")).await;
    assert_eq!(removed, 2);

    assert!(cache.get_context(&key_for("t1", "u1")).await.is_none());
    assert!(cache.get_context(&key_for("t1", "u2")).await.is_none());
    assert!(cache.get_context(&key_for("t2", "u1")).await.is_some());
}

#[tokio::test]
async fn test_invalidate_user_spans_tenants() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    for (t, u) in [("t1", "u1"), ("t2", "u1"), ("t2", "u2")] {
        cache
            .set_context(&key_for(t, u), &context_for(t, u), None)
            .await;
    }

    let removed = cache.invalidate_user(&user("u1")).await;
    assert_eq!(removed, 2);
    assert!(cache.get_context(&key_for("t2", "u2")).await.is_some());
}

#[tokio::test]
async fn test_invalidate_user_in_tenant_is_narrowest() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());

    for (t, u) in [("t1", "u1"), ("t2", "u1")] {
        cache
            .set_context(&key_for(t, u), &context_for(t, u), None)
            .await;
    }

    let removed = cache
        .invalidate_user_in_tenant(&tenant("t1"), &user("u1"))
        .await;
    assert_eq!(removed, 1);
    assert!(cache.get_context(&key_for("t2", "u1")).await.is_some());
}

#[tokio::test]
async fn test_ttl_helpers() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_over(store.clone());
    let key = key_for("t1", "u1");

    assert!(cache.get_ttl(&key).await.is_none());

    cache
        .set_context(&key, &context_for("t1", "u1"), Some(Duration::from_secs(300)))
        .await;
    let ttl = cache.get_ttl(&key).await.expect("entry should carry a ttl");
    assert!(ttl <= Duration::from_secs(300));

    assert!(cache.update_ttl(&key, Duration::from_secs(900)).await);
    let extended = cache.get_ttl(&key).await.unwrap();
    assert!(extended > Duration::from_secs(300));
}

#[tokio::test]
async fn test_degraded_mode_serves_from_fallback() {
    let store = Arc::new(MemoryStore::new());
    let (cache, service) = degradable_cache(store.clone());
    let key = key_for("t1", "u1");
    let ctx = context_for("t1", "u1");

    service.set_degraded(true, "probe failed");

    cache.set_context(&key, &ctx, None).await;
    // The distributed store must not have been written while degraded.
    assert_eq!(store.get(&key.storage_key("authz:ctx")).await.unwrap(), None);

    let cached = cache.get_context(&key).await.expect("fallback should serve");
    assert_eq!(cached.source.origin, ContextOrigin::Cache);

    let removed = cache.invalidate_tenant(&tenant("t1")).await;
    assert_eq!(removed, 1);
    assert!(cache.get_context(&key).await.is_none());
}

#[tokio::test]
async fn test_recovery_stops_reading_fallback() {
    let store = Arc::new(MemoryStore::new());
    let (cache, service) = degradable_cache(store.clone());
    let key = key_for("t1", "u1");

    service.set_degraded(true, "probe failed");
    cache.set_context(&key, &context_for("t1", "u1"), None).await;
    assert!(cache.get_context(&key).await.is_some());

    service.set_degraded(false, "probe recovered");
    // Back on the distributed store, which never saw the entry.
    assert!(cache.get_context(&key).await.is_none());
}

/// Store whose every operation fails, for exercising the cache's
/// fail-soft contract.
struct BrokenStore;

#[async_trait::async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn set_ex(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn delete(&self, _key: &str) -> Result<(), errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn exists(&self, _key: &str) -> Result<bool, errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn ttl(&self, _key: &str) -> Result<i64, errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn scan(&self, _pattern: &str) -> Result<Vec<String>, errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
    async fn ping(&self) -> Result<(), errors::CacheError> {
        Err(errors::CacheError::Connection("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_failures_degrade_to_misses() {
    let cache = AuthorizationCache::new(Arc::new(BrokenStore));
    let key = key_for("t1", "u1");

    // None of these may panic or surface an error to the caller.
    assert!(cache.get_context(&key).await.is_none());
    cache.set_context(&key, &context_for("t1", "u1"), None).await;
    cache.delete_context(&key).await;
    assert!(!cache.exists(&key).await);
    assert!(cache.get_ttl(&key).await.is_none());
    assert!(!cache.update_ttl(&key, Duration::from_secs(60)).await);
    assert_eq!(cache.invalidate_tenant(&tenant("t1")).await, 0);
}

#[tokio::test]
async fn test_revocation_markers() {
    let store = Arc::new(MemoryStore::new());
    let markers = RevocationMarkers::new(store.clone());

    assert_eq!(markers.check_revoked("sess-1").await, Some(false));

    let outcome = markers
        .mark_revoked("sess-1", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(outcome, MarkerWrite::Written);
    assert_eq!(markers.check_revoked("sess-1").await, Some(true));

    markers.clear("sess-1").await.unwrap();
    assert_eq!(markers.check_revoked("sess-1").await, Some(false));
}

#[tokio::test]
async fn test_revocation_skipped_while_degraded() {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DegradationService::new(
        store.clone(),
        DegradationConfig::default(),
    ));
    let markers = RevocationMarkers::new(store.clone()).with_degradation(service.clone());

    service.set_degraded(true, "probe failed");

    let outcome = markers
        .mark_revoked("sess-1", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(outcome, MarkerWrite::SkippedDegraded);
    // Unknown while degraded; the caller falls back to its source of truth.
    assert_eq!(markers.check_revoked("sess-1").await, None);

    service.set_degraded(false, "probe recovered");
    assert_eq!(markers.check_revoked("sess-1").await, Some(false));
}
