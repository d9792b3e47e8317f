use std::collections::HashSet;

use serde::Serialize;
use warden_core::permissions;
use warden_core::{AuthorizationContext, PermissionKey, RoleId};

/// Criteria for one authorization decision. With `require_all` unset each
/// clause passes on any hit; set, each clause needs every entry. An empty
/// clause passes either way.
#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub permissions: Vec<PermissionKey>,
    pub roles: Vec<RoleId>,
    pub require_all: bool,
}

/// Decision plus what was missing, so the consumer can build an actionable
/// denial response instead of a bare 403.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub allowed: bool,
    pub missing_permissions: Vec<PermissionKey>,
    pub missing_roles: Vec<RoleId>,
}

/// Pure queries over one resolved context. Construction indexes the
/// context's sets once; every query afterward is synchronous, side-effect
/// free and infallible. Denials are ordinary `false` results, never errors.
pub struct AuthorizationEngine {
    context: AuthorizationContext,
    permissions: HashSet<PermissionKey>,
    roles: HashSet<RoleId>,
    delegable: HashSet<PermissionKey>,
}

impl AuthorizationEngine {
    pub fn from_context(context: AuthorizationContext) -> Self {
        let permissions = context.permissions.iter().cloned().collect();
        let roles = context.roles.iter().cloned().collect();
        let delegable = context
            .source_map
            .admin_delegations
            .iter()
            .cloned()
            .collect();
        Self {
            context,
            permissions,
            roles,
            delegable,
        }
    }

    pub fn context(&self) -> &AuthorizationContext {
        &self.context
    }

    /// Exact lookup first; wildcard and manage coverage only on miss.
    pub fn has_permission(&self, required: &PermissionKey) -> bool {
        self.permissions.contains(required) || permissions::covers(&self.permissions, required)
    }

    pub fn has_any_permission(&self, required: &[PermissionKey]) -> bool {
        required.is_empty() || required.iter().any(|key| self.has_permission(key))
    }

    pub fn has_all_permissions(&self, required: &[PermissionKey]) -> bool {
        required.iter().all(|key| self.has_permission(key))
    }

    /// Role checks are literal id membership; roles carry no wildcard
    /// semantics.
    pub fn has_role(&self, role: &RoleId) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[RoleId]) -> bool {
        roles.is_empty() || roles.iter().any(|role| self.has_role(role))
    }

    pub fn has_all_roles(&self, roles: &[RoleId]) -> bool {
        roles.iter().all(|role| self.has_role(role))
    }

    pub fn has_feature(&self, feature_key: &str) -> bool {
        self.context.features.contains(feature_key)
    }

    /// Permission and role clauses are evaluated independently and both
    /// must pass; an empty request therefore allows.
    pub fn check(&self, request: &CheckRequest) -> bool {
        if request.require_all {
            self.has_all_permissions(&request.permissions) && self.has_all_roles(&request.roles)
        } else {
            self.has_any_permission(&request.permissions) && self.has_any_role(&request.roles)
        }
    }

    pub fn missing_permissions(&self, required: &[PermissionKey]) -> Vec<PermissionKey> {
        required
            .iter()
            .filter(|key| !self.has_permission(key))
            .cloned()
            .collect()
    }

    pub fn missing_roles(&self, required: &[RoleId]) -> Vec<RoleId> {
        required
            .iter()
            .filter(|role| !self.has_role(role))
            .cloned()
            .collect()
    }

    pub fn check_detailed(&self, request: &CheckRequest) -> CheckReport {
        CheckReport {
            allowed: self.check(request),
            missing_permissions: self.missing_permissions(&request.permissions),
            missing_roles: self.missing_roles(&request.roles),
        }
    }

    /// Whether the user may grant `key` to someone else. Answered from the
    /// delegation pool alone; holding a permission does not imply the right
    /// to hand it out.
    pub fn can_delegate(&self, key: &PermissionKey) -> bool {
        self.delegable.contains(key) || permissions::covers(&self.delegable, key)
    }
}
