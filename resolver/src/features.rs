//! Feature-flag evaluation and module-tree activation.
//!
//! A feature contributes its permissions only while it is structurally
//! active (its module chain is fully active) and, when a rollout flag
//! exists for its key, that flag targets the calling tenant. Percentage
//! rollout hashes `(flagKey, tenantId)` so a tenant's exposure is stable
//! across calls instead of flickering per request.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use xxhash_rust::xxh64::xxh64;

use warden_core::{FeatureCatalog, FeatureFlag, ModuleRecord, PermissionKey, TenantCohort};

/// Deterministic bucket in `[0, 100)` for percentage rollout.
fn rollout_bucket(flag_key: &str, tenant_id: &str) -> u8 {
    (xxh64(format!("{flag_key}:{tenant_id}").as_bytes(), 0) % 100) as u8
}

/// Whether `flag` is on for this tenant at `now`. Every targeting rule must
/// hold; empty allow-lists admit everyone.
pub fn flag_enabled(flag: &FeatureFlag, cohort: &TenantCohort, now: DateTime<Utc>) -> bool {
    if !flag.enabled {
        return false;
    }
    if flag.starts_at.is_some_and(|at| now < at) {
        return false;
    }
    if flag.ends_at.is_some_and(|at| now >= at) {
        return false;
    }
    if !flag.tenant_kinds.is_empty() && !flag.tenant_kinds.contains(&cohort.kind) {
        return false;
    }
    if !flag.plan_ids.is_empty() {
        let Some(plan_id) = &cohort.plan_id else {
            return false;
        };
        if !flag.plan_ids.contains(plan_id) {
            return false;
        }
    }
    if !flag.institution_ids.is_empty() {
        let Some(institution_id) = &cohort.institution_id else {
            return false;
        };
        if !flag.institution_ids.contains(institution_id) {
            return false;
        }
    }
    flag.rollout_percent >= 100
        || rollout_bucket(&flag.key, cohort.tenant_id.as_str()) < flag.rollout_percent
}

/// Module hierarchy as an adjacency list keyed by module id. Parent links
/// in the source data may be malformed (dangling or cyclic); the walk is
/// iterative with a visited guard so neither can hang it.
pub struct ModuleTree {
    active: HashMap<String, bool>,
    parent: HashMap<String, Option<String>>,
}

impl ModuleTree {
    pub fn from_records(modules: &[ModuleRecord]) -> Self {
        let mut active = HashMap::with_capacity(modules.len());
        let mut parent = HashMap::with_capacity(modules.len());
        for module in modules {
            active.insert(module.id.clone(), module.active);
            parent.insert(module.id.clone(), module.parent_id.clone());
        }
        Self { active, parent }
    }

    /// A module is structurally active when it and every ancestor are
    /// active. Unknown module ids count as inactive; a parent cycle ends
    /// the walk with the verdict of the nodes already seen.
    pub fn is_structurally_active(&self, module_id: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = module_id;
        loop {
            if !visited.insert(current) {
                return true;
            }
            match self.active.get(current) {
                Some(true) => {}
                Some(false) | None => return false,
            }
            match self.parent.get(current).and_then(|p| p.as_deref()) {
                Some(parent_id) => current = parent_id,
                None => return true,
            }
        }
    }
}

/// Evaluates the full catalog for one tenant: returns the enabled feature
/// keys and the union of their granted permissions. A feature with no flag
/// record follows structural activation alone; a flag record makes the
/// feature conditional on it.
pub fn active_feature_permissions(
    catalog: &FeatureCatalog,
    flags: &[FeatureFlag],
    cohort: &TenantCohort,
    now: DateTime<Utc>,
) -> (BTreeSet<String>, BTreeSet<PermissionKey>) {
    let tree = ModuleTree::from_records(&catalog.modules);
    let flag_index: HashMap<&str, &FeatureFlag> =
        flags.iter().map(|flag| (flag.key.as_str(), flag)).collect();

    let mut feature_keys = BTreeSet::new();
    let mut permissions = BTreeSet::new();
    for feature in &catalog.features {
        if !feature.active {
            continue;
        }
        if let Some(module_id) = &feature.module_id {
            if !tree.is_structurally_active(module_id) {
                continue;
            }
        }
        if let Some(flag) = flag_index.get(feature.key.as_str()) {
            if !flag_enabled(flag, cohort, now) {
                continue;
            }
        }
        feature_keys.insert(feature.key.clone());
        permissions.extend(feature.permissions.iter().cloned());
    }
    (feature_keys, permissions)
}
