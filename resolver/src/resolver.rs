use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

use cache::AuthorizationCache;
use errors::{DataSourceError, ResolveError};
use resilience::{
    BreakerConfig, BreakerError, CircuitBreaker, DegradationService, RetryPolicy, retry,
};
use warden_core::legacy;
use warden_core::permissions;
use warden_core::{
    AuthorizationContext, CacheKey, ContextOrigin, ContextSource, InstitutionId, PermissionKey,
    PlatformDirectory, RoleId, SourceMap, TenantCohort, TenantDescriptor, TenantId,
    TenantRepositoryFactory, TenantScope, UserId,
};

use crate::features;

/// Outcome of one resolution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub context: AuthorizationContext,
    pub from_cache: bool,
    pub resolution_time_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverSettings {
    /// Cache TTL for freshly resolved contexts; the cache's own default
    /// applies when unset.
    pub cache_ttl: Option<Duration>,
}

/// Resolves authorization contexts. The resolver, breaker and degradation
/// service are process-wide and shared across calls; the tenant-scoped
/// repositories are not. Each resolution opens its own bundle from the
/// factory and drops it on return, so concurrent resolutions for different
/// tenants never share scope state.
pub struct AuthorizationResolver {
    factory: Arc<dyn TenantRepositoryFactory>,
    platform: Arc<dyn PlatformDirectory>,
    cache: Arc<AuthorizationCache>,
    breaker: Arc<CircuitBreaker>,
    degradation: Option<Arc<DegradationService>>,
    db_retry: RetryPolicy,
    settings: ResolverSettings,
}

impl AuthorizationResolver {
    pub fn new(
        factory: Arc<dyn TenantRepositoryFactory>,
        platform: Arc<dyn PlatformDirectory>,
        cache: Arc<AuthorizationCache>,
    ) -> Self {
        Self {
            factory,
            platform,
            cache,
            breaker: Arc::new(CircuitBreaker::new("database", BreakerConfig::default())),
            degradation: None,
            db_retry: RetryPolicy::database(),
            settings: ResolverSettings::default(),
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_degradation(mut self, service: Arc<DegradationService>) -> Self {
        self.degradation = Some(service);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.db_retry = policy;
        self
    }

    pub fn with_settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Starts the degradation probe loop, when a service is attached.
    pub fn start(self: &Arc<Self>) {
        if let Some(service) = &self.degradation {
            service.start();
        }
    }

    pub fn shutdown(&self) {
        if let Some(service) = &self.degradation {
            service.stop();
        }
    }

    /// Resolves the authorization context for `user_id` inside `tenant`.
    ///
    /// The tenant gate runs before anything else, including cache reads:
    /// a missing or malformed tenant descriptor fails with `INVALID_TENANT`
    /// and there is no fallback resolution path. `force_refresh` bypasses
    /// the cache read but still writes the fresh result back.
    pub async fn resolve(
        &self,
        user_id: &UserId,
        tenant: Option<&TenantDescriptor>,
        institution_id: Option<InstitutionId>,
        force_refresh: bool,
    ) -> Result<Resolution, ResolveError> {
        let started = Instant::now();

        let scope = TenantScope::from_descriptor(tenant)?;
        let cache_key = CacheKey::with_institution(
            scope.tenant_id.clone(),
            user_id.clone(),
            institution_id.clone(),
        );

        if !force_refresh {
            if let Some(context) = self.cache.get_context(&cache_key).await {
                let elapsed = elapsed_ms(started);
                counter!("authz_resolutions_total", "source" => "cache").increment(1);
                histogram!("authz_resolution_duration_ms").record(elapsed as f64);
                debug!(
                    tenant_id = %scope.tenant_id,
                    user_id = %user_id,
                    "authorization context served from cache"
                );
                return Ok(Resolution {
                    context,
                    from_cache: true,
                    resolution_time_ms: elapsed,
                });
            }
        }

        let context = self.resolve_fresh(user_id, &scope, institution_id).await?;

        let ttl = self.settings.cache_ttl.unwrap_or(self.cache.default_ttl());
        self.cache.set_context(&cache_key, &context, Some(ttl)).await;

        let elapsed = elapsed_ms(started);
        counter!("authz_resolutions_total", "source" => "fresh").increment(1);
        histogram!("authz_resolution_duration_ms").record(elapsed as f64);
        info!(
            tenant_id = %scope.tenant_id,
            user_id = %user_id,
            roles = context.roles.len(),
            permissions = context.permissions.len(),
            features = context.features.len(),
            elapsed_ms = elapsed,
            "authorization context resolved"
        );
        Ok(Resolution {
            context,
            from_cache: false,
            resolution_time_ms: elapsed,
        })
    }

    /// Drops the cached entry and re-resolves, for permission changes that
    /// must take effect immediately.
    pub async fn refresh(
        &self,
        user_id: &UserId,
        tenant: Option<&TenantDescriptor>,
        institution_id: Option<InstitutionId>,
    ) -> Result<Resolution, ResolveError> {
        let scope = TenantScope::from_descriptor(tenant)?;
        let cache_key = CacheKey::with_institution(
            scope.tenant_id.clone(),
            user_id.clone(),
            institution_id.clone(),
        );
        self.cache.delete_context(&cache_key).await;
        self.resolve(user_id, tenant, institution_id, true).await
    }

    /// Drops the user's cached contexts in one tenant without recomputing;
    /// the next resolve pays the full pipeline.
    pub async fn invalidate_for_user(&self, user_id: &UserId, tenant_id: &TenantId) -> u64 {
        self.cache.invalidate_user_in_tenant(tenant_id, user_id).await
    }

    pub async fn invalidate_for_tenant(&self, tenant_id: &TenantId) -> u64 {
        self.cache.invalidate_tenant(tenant_id).await
    }

    async fn resolve_fresh(
        &self,
        user_id: &UserId,
        scope: &TenantScope,
        institution_id: Option<InstitutionId>,
    ) -> Result<AuthorizationContext, ResolveError> {
        // Repositories are opened per call and dropped with this frame.
        let repos = self.factory.open(scope);
        let now_epoch = Utc::now().timestamp();

        let (assignments, overrides) = tokio::try_join!(
            self.guarded("role_assignments", || {
                repos.assignments.assignments_for_user(user_id)
            }),
            self.guarded("user_overrides", || {
                repos.overrides.overrides_for_user(user_id)
            }),
        )?;

        let active_roles: Vec<RoleId> = assignments
            .iter()
            .filter(|assignment| assignment.is_active(now_epoch))
            .map(|assignment| assignment.role_id.clone())
            .collect();
        let roles: BTreeSet<RoleId> = active_roles.iter().cloned().collect();

        // One batch call for the whole role set, regardless of role count.
        let raw_role_permissions = if active_roles.is_empty() {
            Vec::new()
        } else {
            self.guarded("role_permissions", || {
                repos.role_permissions.permissions_for_roles(&active_roles)
            })
            .await?
        };
        let role_permissions = legacy::normalize_keys(raw_role_permissions);

        let user_overrides = legacy::normalize_keys(
            overrides
                .iter()
                .filter(|o| o.is_active(now_epoch))
                .map(|o| o.key.as_str()),
        );

        let delegations = self
            .guarded("delegations", || {
                repos.delegations.delegable_permissions(user_id)
            })
            .await?;
        let admin_delegations = legacy::normalize_keys(
            delegations
                .iter()
                .filter(|grant| grant.is_active(now_epoch))
                .map(|grant| grant.key.as_str()),
        );

        let institution = self
            .guarded("institution", || {
                self.platform
                    .institution(&scope.tenant_id, institution_id.as_ref())
            })
            .await?;
        let plan_id = institution.as_ref().and_then(|record| record.plan_id.clone());
        let plan_permissions = match &plan_id {
            Some(plan) => {
                self.guarded("plan_permissions", || self.platform.plan_permissions(plan))
                    .await?
            }
            None => BTreeSet::new(),
        };

        let catalog = self
            .guarded("feature_catalog", || self.platform.feature_catalog())
            .await?;
        let flags = self
            .guarded("feature_flags", || self.platform.feature_flags())
            .await?;
        let cohort = TenantCohort {
            tenant_id: scope.tenant_id.clone(),
            kind: scope.kind,
            plan_id: plan_id.clone(),
            institution_id: institution_id.clone(),
        };
        let (feature_keys, feature_permissions) =
            features::active_feature_permissions(&catalog, &flags, &cohort, Utc::now());

        // Merge, then ceilings. Both filters skip on an empty ceiling so an
        // unconfigured plan or feature catalog does not lock a tenant out.
        let runtime: BTreeSet<PermissionKey> =
            role_permissions.union(&user_overrides).cloned().collect();
        let runtime = permissions::apply_ceiling(&runtime, &plan_permissions);
        let runtime = permissions::apply_ceiling(&runtime, &feature_permissions);

        if runtime.is_empty() && !role_permissions.is_empty() {
            warn!(
                tenant_id = %scope.tenant_id,
                user_id = %user_id,
                "ceiling filters removed every granted permission"
            );
        }

        let ttl = self.settings.cache_ttl.unwrap_or(self.cache.default_ttl());
        Ok(AuthorizationContext {
            user_id: user_id.clone(),
            tenant_id: scope.tenant_id.clone(),
            institution_id,
            roles,
            permissions: runtime,
            plan_id,
            features: feature_keys,
            source: ContextSource {
                origin: ContextOrigin::Fresh,
                resolved_at: Utc::now().timestamp(),
                ttl_secs: ttl.as_secs(),
            },
            source_map: SourceMap {
                role_permissions,
                user_overrides,
                plan_permissions,
                admin_delegations,
                feature_permissions,
            },
        })
    }

    /// Data-boundary wrapper: retrier outermost, breaker per attempt.
    /// Breaker rejections map to non-transient errors, so an open breaker
    /// is surfaced immediately instead of being retried against.
    async fn guarded<T, F, Fut>(
        &self,
        op_name: &'static str,
        operation: F,
    ) -> Result<T, DataSourceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DataSourceError>>,
    {
        retry(&self.db_retry, op_name, move || {
            let fut = operation();
            async move {
                self.breaker.execute(move || fut).await.map_err(|err| match err {
                    BreakerError::Open { retry_after_ms } => {
                        DataSourceError::CircuitOpen { retry_after_ms }
                    }
                    BreakerError::HalfOpenLimit => DataSourceError::CircuitHalfOpen,
                    BreakerError::Inner(inner) => inner,
                })
            }
        })
        .await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
