//! # Warden Core
//!
//! Shared types and traits for the Warden authorization engine.
//!
//! This crate provides:
//! - Identifier newtypes and the tenant gate types
//! - The resolved [`types::AuthorizationContext`] snapshot and its cache key
//! - Repository and platform-directory trait contracts
//! - Permission-key coverage matching with documented precedence
//! - The legacy permission-key translation shim

pub mod legacy;
pub mod permissions;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use traits::{
    DelegationRepository, PlatformDirectory, RoleAssignmentRepository, RolePermissionRepository,
    TenantRepositories, TenantRepositoryFactory, UserOverrideRepository,
};
pub use types::{
    AuthorizationContext, CacheKey, ContextOrigin, ContextSource, DelegationGrant, FeatureCatalog,
    FeatureDefinition, FeatureFlag, InstitutionId, InstitutionRecord, ModuleRecord, PermissionKey,
    PermissionOverride, PlanId, RoleAssignment, RoleId, SourceMap, TenantCohort, TenantDescriptor,
    TenantId, TenantKind, TenantScope, UserId,
};
