use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use errors::DataSourceError;
use warden_core::{
    FeatureCatalog, FeatureDefinition, FeatureFlag, InstitutionId, InstitutionRecord,
    ModuleRecord, PermissionKey, PlanId, PlatformDirectory, TenantId,
};

/// Seedable platform catalog: institutions, plan grants, the module tree,
/// feature definitions and rollout flags. Lookups clone out of the seed so
/// callers can never mutate shared state.
#[derive(Default)]
pub struct InMemoryPlatform {
    institutions: Mutex<HashMap<String, Vec<InstitutionRecord>>>,
    plans: Mutex<HashMap<String, BTreeSet<PermissionKey>>>,
    catalog: Mutex<FeatureCatalog>,
    flags: Mutex<Vec<FeatureFlag>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_institution(&self, tenant_id: &str, institution_id: &str, plan_id: Option<&str>) {
        let record = InstitutionRecord {
            id: InstitutionId::new(institution_id.to_string()).expect("valid institution id"),
            name: institution_id.to_string(),
            plan_id: plan_id.map(|id| PlanId::new(id.to_string()).expect("valid plan id")),
        };
        self.institutions
            .lock()
            .entry(tenant_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn set_plan_permissions(&self, plan_id: &str, keys: &[&str]) {
        let granted = keys
            .iter()
            .map(|key| PermissionKey::new(*key).expect("valid permission key"))
            .collect();
        self.plans.lock().insert(plan_id.to_string(), granted);
    }

    pub fn add_module(&self, id: &str, parent_id: Option<&str>, active: bool) {
        self.catalog.lock().modules.push(ModuleRecord {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            active,
        });
    }

    /// Adds an active feature granting `keys`.
    pub fn add_feature(&self, key: &str, module_id: Option<&str>, keys: &[&str]) {
        self.push_feature(FeatureDefinition {
            key: key.to_string(),
            module_id: module_id.map(str::to_string),
            active: true,
            permissions: keys
                .iter()
                .map(|key| PermissionKey::new(*key).expect("valid permission key"))
                .collect(),
        });
    }

    pub fn push_feature(&self, feature: FeatureDefinition) {
        self.catalog.lock().features.push(feature);
    }

    pub fn add_flag(&self, flag: FeatureFlag) {
        self.flags.lock().push(flag);
    }

    /// Adds a flag that enables `key` for everyone.
    pub fn enable_flag(&self, key: &str) {
        self.add_flag(permissive_flag(key, true));
    }

    pub fn disable_flag(&self, key: &str) {
        self.add_flag(permissive_flag(key, false));
    }
}

/// A flag with no targeting at all: every cohort passes, rollout is full.
pub fn permissive_flag(key: &str, enabled: bool) -> FeatureFlag {
    FeatureFlag {
        key: key.to_string(),
        enabled,
        starts_at: None,
        ends_at: None,
        tenant_kinds: Vec::new(),
        plan_ids: Vec::new(),
        institution_ids: Vec::new(),
        rollout_percent: 100,
    }
}

#[async_trait]
impl PlatformDirectory for InMemoryPlatform {
    async fn institution(
        &self,
        tenant_id: &TenantId,
        institution_id: Option<&InstitutionId>,
    ) -> Result<Option<InstitutionRecord>, DataSourceError> {
        let institutions = self.institutions.lock();
        let Some(records) = institutions.get(tenant_id.as_str()) else {
            return Ok(None);
        };
        Ok(match institution_id {
            Some(id) => records.iter().find(|record| record.id == *id).cloned(),
            None => records.first().cloned(),
        })
    }

    async fn plan_permissions(
        &self,
        plan_id: &PlanId,
    ) -> Result<BTreeSet<PermissionKey>, DataSourceError> {
        Ok(self
            .plans
            .lock()
            .get(plan_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn feature_catalog(&self) -> Result<FeatureCatalog, DataSourceError> {
        Ok(self.catalog.lock().clone())
    }

    async fn feature_flags(&self) -> Result<Vec<FeatureFlag>, DataSourceError> {
        Ok(self.flags.lock().clone())
    }
}
