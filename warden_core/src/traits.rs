use async_trait::async_trait;
use errors::DataSourceError;

use crate::types::{
    DelegationGrant, FeatureCatalog, FeatureFlag, InstitutionId, InstitutionRecord,
    PermissionOverride, PlanId, RoleAssignment, RoleId, TenantId, TenantScope, UserId,
};

/// Role assignments for users inside one tenant schema.
#[async_trait]
pub trait RoleAssignmentRepository: Send + Sync {
    async fn assignments_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<RoleAssignment>, DataSourceError>;
}

/// Permission keys attached to roles, loaded in one batch per resolution.
/// Keys come back as raw strings; the caller runs them through the legacy
/// shim before use.
#[async_trait]
pub trait RolePermissionRepository: Send + Sync {
    async fn permissions_for_roles(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<String>, DataSourceError>;
}

/// Direct per-user permission grants.
#[async_trait]
pub trait UserOverrideRepository: Send + Sync {
    async fn overrides_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PermissionOverride>, DataSourceError>;
}

/// Permissions a user is allowed to pass on to others.
#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn delegable_permissions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<DelegationGrant>, DataSourceError>;
}

/// The repositories backing one resolution, all bound to a single tenant
/// schema. A bundle is built per call and dropped when the call ends; it is
/// never stored on the resolver, so concurrent resolutions for different
/// tenants cannot observe each other's scope.
pub struct TenantRepositories {
    pub assignments: Box<dyn RoleAssignmentRepository>,
    pub role_permissions: Box<dyn RolePermissionRepository>,
    pub overrides: Box<dyn UserOverrideRepository>,
    pub delegations: Box<dyn DelegationRepository>,
}

/// Constructs tenant-scoped repository bundles. Implementations typically
/// hold a shared pool and bind the scope's schema per call; construction
/// must stay cheap because it happens on every resolution.
pub trait TenantRepositoryFactory: Send + Sync {
    fn open(&self, scope: &TenantScope) -> TenantRepositories;
}

/// Platform-level catalogs that are not tenant-schema-scoped: institutions,
/// plans, the module/feature catalog, and rollout flags.
#[async_trait]
pub trait PlatformDirectory: Send + Sync {
    async fn institution(
        &self,
        tenant_id: &TenantId,
        institution_id: Option<&InstitutionId>,
    ) -> Result<Option<InstitutionRecord>, DataSourceError>;

    async fn plan_permissions(
        &self,
        plan_id: &PlanId,
    ) -> Result<std::collections::BTreeSet<crate::types::PermissionKey>, DataSourceError>;

    async fn feature_catalog(&self) -> Result<FeatureCatalog, DataSourceError>;

    async fn feature_flags(&self) -> Result<Vec<FeatureFlag>, DataSourceError>;
}
