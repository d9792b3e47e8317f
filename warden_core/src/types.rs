use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifiers embed into colon-delimited cache keys and scan patterns, so
/// `:`, `*` and whitespace are rejected outright.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 100
        && id
            .chars()
            .all(|c| !c.is_whitespace() && c != ':' && c != '*')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: String) -> Option<Self> {
        if is_valid_id(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid tenant ID"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: String) -> Option<Self> {
        if is_valid_id(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid user ID"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct InstitutionId(String);

impl InstitutionId {
    pub fn new(id: String) -> Option<Self> {
        if is_valid_id(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for InstitutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InstitutionId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid institution ID"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(id: String) -> Option<Self> {
        if is_valid_id(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoleId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid role ID"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: String) -> Option<Self> {
        if is_valid_id(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlanId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid plan ID"))
    }
}

/// Dot-namespaced permission key: `students.view`, `settings.rbac.manage`,
/// `settings.*`, or the global `*`. A `*` is only valid as the whole key or
/// as the final segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PermissionKey(String);

impl PermissionKey {
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if Self::is_well_formed(&key) {
            Some(Self(key))
        } else {
            None
        }
    }

    /// Lenient constructor reserved for the legacy shim's pass-through path.
    /// Keys built here may never cover a well-formed required key; unknown
    /// legacy grants stay inert rather than failing the whole load.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn is_well_formed(key: &str) -> bool {
        if key == "*" {
            return true;
        }
        if key.is_empty() || key.len() > 200 {
            return false;
        }
        let segments: Vec<&str> = key.split('.').collect();
        let last = segments.len() - 1;
        for (idx, segment) in segments.iter().enumerate() {
            if *segment == "*" {
                return idx == last && segments.len() > 1;
            }
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
            if !valid {
                return false;
            }
        }
        true
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn is_global_wildcard(&self) -> bool {
        self.0 == "*"
    }

    pub fn is_prefix_wildcard(&self) -> bool {
        self.0.len() > 1 && self.0.ends_with(".*")
    }

    /// Everything before the final segment, or `None` for single-segment
    /// keys and the global wildcard.
    pub fn namespace(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(ns, _)| ns)
    }

    /// The final segment.
    pub fn action(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, a)| a)
    }

    pub fn is_manage(&self) -> bool {
        self.action() == "manage"
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PermissionKey {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| anyhow::anyhow!("Invalid permission key: {s}"))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TenantKind {
    School,
    College,
    University,
    TrainingCenter,
}

/// Raw tenant context as delivered by the request middleware. Nothing here
/// has been validated; the resolver's gate turns this into a
/// [`TenantScope`] or rejects the call outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDescriptor {
    pub id: String,
    pub schema: String,
    pub kind: TenantKind,
}

/// Validated tenant scope. Only constructed through the gate, so holding
/// one is proof the tenant context was present and well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantScope {
    pub tenant_id: TenantId,
    pub schema: String,
    pub kind: TenantKind,
}

impl TenantScope {
    /// The tenant gate. Runs before any cache or repository access; a
    /// rejection here must never fall back to a default tenant.
    pub fn from_descriptor(
        descriptor: Option<&TenantDescriptor>,
    ) -> Result<Self, errors::ResolveError> {
        let descriptor =
            descriptor.ok_or_else(|| errors::ResolveError::invalid_tenant("tenant context missing"))?;
        let tenant_id = TenantId::new(descriptor.id.clone()).ok_or_else(|| {
            errors::ResolveError::invalid_tenant("tenant identifier empty or malformed")
        })?;
        let schema = descriptor.schema.trim();
        if schema.is_empty() {
            return Err(errors::ResolveError::invalid_tenant(
                "tenant schema reference missing",
            ));
        }
        let schema_valid = schema
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !schema_valid {
            return Err(errors::ResolveError::invalid_tenant(
                "tenant schema reference malformed",
            ));
        }
        Ok(Self {
            tenant_id,
            schema: schema.to_string(),
            kind: descriptor.kind,
        })
    }
}

/// Cache identity for one resolved context. Tenant and user are mandatory
/// by construction; the institution segment renders as `-` when absent so
/// scan patterns stay unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub institution_id: Option<InstitutionId>,
}

impl CacheKey {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            institution_id: None,
        }
    }

    pub fn with_institution(
        tenant_id: TenantId,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> Self {
        Self {
            tenant_id,
            user_id,
            institution_id,
        }
    }

    pub fn storage_key(&self, prefix: &str) -> String {
        match &self.institution_id {
            Some(inst) => format!(
                "{prefix}:{}:{}:{}",
                self.tenant_id, self.user_id, inst
            ),
            None => format!("{prefix}:{}:{}:-", self.tenant_id, self.user_id),
        }
    }

    /// The single identity check applied to every entry read from or
    /// written to the cache. A mismatch means a poisoned or misfiled entry.
    pub fn matches_context(&self, ctx: &AuthorizationContext) -> bool {
        self.tenant_id == ctx.tenant_id
            && self.user_id == ctx.user_id
            && self.institution_id == ctx.institution_id
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ContextOrigin {
    Fresh,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub origin: ContextOrigin,
    pub resolved_at: i64,
    pub ttl_secs: u64,
}

/// Unfiltered permission sets broken down by origin, kept for audit and for
/// the delegation pool. Everything except `admin_delegations` is
/// informational; effective checks go through the merged `permissions` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub role_permissions: BTreeSet<PermissionKey>,
    pub user_overrides: BTreeSet<PermissionKey>,
    pub plan_permissions: BTreeSet<PermissionKey>,
    pub admin_delegations: BTreeSet<PermissionKey>,
    pub feature_permissions: BTreeSet<PermissionKey>,
}

/// The resolved authorization snapshot for one user in one tenant scope.
/// Built once per resolution and read-only afterward; every field is
/// serialized camelCase because this struct is what lands in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationContext {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<InstitutionId>,
    pub roles: BTreeSet<RoleId>,
    pub permissions: BTreeSet<PermissionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    pub features: BTreeSet<String>,
    pub source: ContextSource,
    pub source_map: SourceMap,
}

/// A role granted to a user, optionally time-bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub role_id: RoleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl RoleAssignment {
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A direct per-user permission grant. Keys are raw strings at this layer
/// because stored overrides may predate the current key scheme; the
/// resolver runs them through the legacy shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverride {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl PermissionOverride {
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A permission this user may delegate to others. Distinct from holding
/// the permission; lives in its own pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationGrant {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl DelegationGrant {
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionRecord {
    pub id: InstitutionId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
}

/// One node of the product module hierarchy, parent-linked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    pub active: bool,
    pub permissions: BTreeSet<PermissionKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCatalog {
    pub modules: Vec<ModuleRecord>,
    pub features: Vec<FeatureDefinition>,
}

/// Rollout flag for one feature key. Empty allow-lists mean "everyone".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub key: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tenant_kinds: Vec<TenantKind>,
    #[serde(default)]
    pub plan_ids: Vec<PlanId>,
    #[serde(default)]
    pub institution_ids: Vec<InstitutionId>,
    pub rollout_percent: u8,
}

/// The attributes of the calling tenant that flag targeting keys on.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantCohort {
    pub tenant_id: TenantId,
    pub kind: TenantKind,
    pub plan_id: Option<PlanId>,
    pub institution_id: Option<InstitutionId>,
}
