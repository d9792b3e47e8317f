use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use errors::DataSourceError;
use warden_core::{
    DelegationGrant, DelegationRepository, PermissionOverride, RoleAssignment,
    RoleAssignmentRepository, RoleId, RolePermissionRepository, TenantRepositories,
    TenantRepositoryFactory, TenantScope, UserId, UserOverrideRepository,
};

#[derive(Default)]
struct TenantData {
    assignments: HashMap<String, Vec<RoleAssignment>>,
    role_permissions: HashMap<String, Vec<String>>,
    overrides: HashMap<String, Vec<PermissionOverride>>,
    delegations: HashMap<String, Vec<DelegationGrant>>,
}

/// Seedable multi-tenant dataset behind [`TenantRepositoryFactory`]. `open`
/// constructs fresh repository values on every call, each bound to the
/// requested scope's data, the way production binds a schema per
/// resolution. An optional per-call delay widens interleaving windows for
/// concurrency tests, and the assignments repository can be scripted to
/// fail for retry and breaker tests.
pub struct InMemoryTenantDirectory {
    tenants: DashMap<String, Arc<Mutex<TenantData>>>,
    call_delay: Mutex<Option<Duration>>,
    opened_scopes: Mutex<Vec<String>>,
    calls: Arc<AtomicUsize>,
    assignment_failures: Arc<AtomicUsize>,
}

impl Default for InMemoryTenantDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            call_delay: Mutex::new(None),
            opened_scopes: Mutex::new(Vec::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            assignment_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn tenant(&self, tenant_id: &str) -> Arc<Mutex<TenantData>> {
        self.tenants.entry(tenant_id.to_string()).or_default().clone()
    }

    pub fn assign_role(&self, tenant_id: &str, user_id: &str, role: &str) {
        self.assign_role_until(tenant_id, user_id, role, None);
    }

    pub fn assign_role_until(
        &self,
        tenant_id: &str,
        user_id: &str,
        role: &str,
        expires_at: Option<i64>,
    ) {
        let data = self.tenant(tenant_id);
        data.lock()
            .assignments
            .entry(user_id.to_string())
            .or_default()
            .push(RoleAssignment {
                role_id: RoleId::new(role.to_string()).expect("valid role id"),
                expires_at,
            });
    }

    pub fn grant_role_permissions(&self, tenant_id: &str, role: &str, keys: &[&str]) {
        let data = self.tenant(tenant_id);
        data.lock()
            .role_permissions
            .entry(role.to_string())
            .or_default()
            .extend(keys.iter().map(|key| (*key).to_string()));
    }

    pub fn add_override(&self, tenant_id: &str, user_id: &str, key: &str) {
        self.add_override_until(tenant_id, user_id, key, None);
    }

    pub fn add_override_until(
        &self,
        tenant_id: &str,
        user_id: &str,
        key: &str,
        expires_at: Option<i64>,
    ) {
        let data = self.tenant(tenant_id);
        data.lock()
            .overrides
            .entry(user_id.to_string())
            .or_default()
            .push(PermissionOverride {
                key: key.to_string(),
                expires_at,
            });
    }

    pub fn add_delegation(&self, tenant_id: &str, user_id: &str, key: &str) {
        self.add_delegation_until(tenant_id, user_id, key, None);
    }

    pub fn add_delegation_until(
        &self,
        tenant_id: &str,
        user_id: &str,
        key: &str,
        expires_at: Option<i64>,
    ) {
        let data = self.tenant(tenant_id);
        data.lock()
            .delegations
            .entry(user_id.to_string())
            .or_default()
            .push(DelegationGrant {
                key: key.to_string(),
                expires_at,
            });
    }

    /// Injects a sleep into every repository call.
    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = Some(delay);
    }

    /// The next `times` assignment loads fail with a transient connection
    /// error.
    pub fn fail_assignments_times(&self, times: usize) {
        self.assignment_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_assignments_forever(&self) {
        self.assignment_failures.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn clear_assignment_failures(&self) {
        self.assignment_failures.store(0, Ordering::SeqCst);
    }

    /// Tenant ids passed to `open`, in call order.
    pub fn opened_scopes(&self) -> Vec<String> {
        self.opened_scopes.lock().clone()
    }

    pub fn opened_count(&self) -> usize {
        self.opened_scopes.lock().len()
    }

    /// Total repository method invocations across all tenants.
    pub fn repository_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TenantRepositoryFactory for InMemoryTenantDirectory {
    fn open(&self, scope: &TenantScope) -> TenantRepositories {
        self.opened_scopes
            .lock()
            .push(scope.tenant_id.as_str().to_string());
        let data = self.tenant(scope.tenant_id.as_str());
        let delay = *self.call_delay.lock();
        let shared = RepoShared {
            data,
            delay,
            calls: Arc::clone(&self.calls),
        };
        TenantRepositories {
            assignments: Box::new(AssignmentsRepo {
                shared: shared.clone(),
                failures: Arc::clone(&self.assignment_failures),
            }),
            role_permissions: Box::new(RolePermissionsRepo {
                shared: shared.clone(),
            }),
            overrides: Box::new(OverridesRepo {
                shared: shared.clone(),
            }),
            delegations: Box::new(DelegationsRepo { shared }),
        }
    }
}

#[derive(Clone)]
struct RepoShared {
    data: Arc<Mutex<TenantData>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl RepoShared {
    async fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn take_scripted_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
            0 => None,
            usize::MAX => Some(usize::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

struct AssignmentsRepo {
    shared: RepoShared,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl RoleAssignmentRepository for AssignmentsRepo {
    async fn assignments_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<RoleAssignment>, DataSourceError> {
        self.shared.touch().await;
        if take_scripted_failure(&self.failures) {
            return Err(DataSourceError::Connection {
                source_name: "role_assignments",
                message: "connection refused".to_string(),
            });
        }
        Ok(self
            .shared
            .data
            .lock()
            .assignments
            .get(user_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

struct RolePermissionsRepo {
    shared: RepoShared,
}

#[async_trait]
impl RolePermissionRepository for RolePermissionsRepo {
    async fn permissions_for_roles(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<String>, DataSourceError> {
        self.shared.touch().await;
        let data = self.shared.data.lock();
        let mut keys = Vec::new();
        for role in role_ids {
            if let Some(granted) = data.role_permissions.get(role.as_str()) {
                keys.extend(granted.iter().cloned());
            }
        }
        Ok(keys)
    }
}

struct OverridesRepo {
    shared: RepoShared,
}

#[async_trait]
impl UserOverrideRepository for OverridesRepo {
    async fn overrides_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PermissionOverride>, DataSourceError> {
        self.shared.touch().await;
        Ok(self
            .shared
            .data
            .lock()
            .overrides
            .get(user_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

struct DelegationsRepo {
    shared: RepoShared,
}

#[async_trait]
impl DelegationRepository for DelegationsRepo {
    async fn delegable_permissions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<DelegationGrant>, DataSourceError> {
        self.shared.touch().await;
        Ok(self
            .shared
            .data
            .lock()
            .delegations
            .get(user_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
