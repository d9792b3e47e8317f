//! Permission-key coverage matching.
//!
//! Precedence, strongest first: exact key, global `*`, prefix wildcard
//! (`settings.*` covers `settings.rbac.view`), manage implication
//! (`students.manage` covers other actions under `students.`). Precedence
//! only matters when reporting which grant satisfied a check; any level
//! authorizes.

use std::collections::BTreeSet;

use crate::types::PermissionKey;

/// How a granted key covers a required key. `Ord` follows precedence, so
/// `max()` over candidate matches picks the strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionMatch {
    ManageImplied,
    PrefixWildcard,
    GlobalWildcard,
    Exact,
}

pub fn match_permission(
    granted: &PermissionKey,
    required: &PermissionKey,
) -> Option<PermissionMatch> {
    if granted == required {
        return Some(PermissionMatch::Exact);
    }
    if granted.is_global_wildcard() {
        return Some(PermissionMatch::GlobalWildcard);
    }
    if granted.is_prefix_wildcard() {
        // "settings.*" covers everything under "settings." but not the bare
        // "settings" key itself.
        let prefix = &granted.as_str()[..granted.as_str().len() - 1];
        if required.as_str().starts_with(prefix) {
            return Some(PermissionMatch::PrefixWildcard);
        }
    }
    if granted.is_manage() {
        if let Some(namespace) = granted.namespace() {
            let prefix = format!("{namespace}.");
            if required.as_str().starts_with(&prefix) {
                return Some(PermissionMatch::ManageImplied);
            }
        }
    }
    None
}

/// Strongest match for `required` across a grant set, if any grant covers it.
pub fn best_match<'a, I>(grants: I, required: &PermissionKey) -> Option<PermissionMatch>
where
    I: IntoIterator<Item = &'a PermissionKey>,
{
    grants
        .into_iter()
        .filter_map(|granted| match_permission(granted, required))
        .max()
}

pub fn covers<'a, I>(grants: I, required: &PermissionKey) -> bool
where
    I: IntoIterator<Item = &'a PermissionKey>,
{
    best_match(grants, required).is_some()
}

/// Restricts `runtime` to the keys admitted by `ceiling`. An empty ceiling
/// imposes no restriction; this pass-through is product policy for plans
/// and feature sets that have no explicit entries, not an error path.
pub fn apply_ceiling(
    runtime: &BTreeSet<PermissionKey>,
    ceiling: &BTreeSet<PermissionKey>,
) -> BTreeSet<PermissionKey> {
    if ceiling.is_empty() {
        return runtime.clone();
    }
    runtime
        .iter()
        .filter(|key| covers(ceiling, key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PermissionKey {
        PermissionKey::new(s).unwrap()
    }

    fn keys(items: &[&str]) -> BTreeSet<PermissionKey> {
        items.iter().map(|s| key(s)).collect()
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(
            match_permission(&key("students.view"), &key("students.view")),
            Some(PermissionMatch::Exact)
        );
        assert_eq!(
            match_permission(&key("students.view"), &key("students.manage")),
            None
        );
    }

    #[test]
    fn test_global_wildcard() {
        assert_eq!(
            match_permission(&key("*"), &key("fees.collect")),
            Some(PermissionMatch::GlobalWildcard)
        );
    }

    #[test]
    fn test_prefix_wildcard() {
        assert_eq!(
            match_permission(&key("settings.*"), &key("settings.rbac.view")),
            Some(PermissionMatch::PrefixWildcard)
        );
        assert_eq!(
            match_permission(&key("settings.*"), &key("settings.view")),
            Some(PermissionMatch::PrefixWildcard)
        );
        assert_eq!(match_permission(&key("settings.*"), &key("students.view")), None);
        // does not cover the bare namespace key
        assert_eq!(match_permission(&key("settings.*"), &key("settings")), None);
    }

    #[test]
    fn test_manage_implication() {
        assert_eq!(
            match_permission(&key("students.manage"), &key("students.view")),
            Some(PermissionMatch::ManageImplied)
        );
        assert_eq!(
            match_permission(&key("students.manage"), &key("students.admissions.view")),
            Some(PermissionMatch::ManageImplied)
        );
        // different namespace is untouched
        assert_eq!(
            match_permission(&key("students.manage"), &key("staff.view")),
            None
        );
        // the bare namespace key is not implied
        assert_eq!(match_permission(&key("students.manage"), &key("students")), None);
        // manage does not reach across sibling namespaces that merely share
        // a string prefix
        assert_eq!(
            match_permission(&key("students.manage"), &key("studentsarchive.view")),
            None
        );
    }

    #[test]
    fn test_precedence_ordering() {
        let grants = keys(&["*", "students.*", "students.manage", "students.view"]);
        assert_eq!(
            best_match(&grants, &key("students.view")),
            Some(PermissionMatch::Exact)
        );

        let no_exact = keys(&["*", "students.*", "students.manage"]);
        assert_eq!(
            best_match(&no_exact, &key("students.view")),
            Some(PermissionMatch::GlobalWildcard)
        );

        let scoped = keys(&["students.*", "students.manage"]);
        assert_eq!(
            best_match(&scoped, &key("students.view")),
            Some(PermissionMatch::PrefixWildcard)
        );

        let manage_only = keys(&["students.manage"]);
        assert_eq!(
            best_match(&manage_only, &key("students.view")),
            Some(PermissionMatch::ManageImplied)
        );
    }

    #[test]
    fn test_ceiling_intersection_with_exact_keys() {
        let runtime = keys(&["students.view", "reports.export"]);
        let plan = keys(&["students.view", "attendance.mark"]);
        assert_eq!(apply_ceiling(&runtime, &plan), keys(&["students.view"]));
    }

    #[test]
    fn test_empty_ceiling_is_no_restriction() {
        let runtime = keys(&["students.view", "reports.export"]);
        assert_eq!(apply_ceiling(&runtime, &BTreeSet::new()), runtime);
    }

    #[test]
    fn test_wildcard_ceiling_admits_covered_keys() {
        let runtime = keys(&["students.view", "students.manage", "fees.collect"]);
        let plan = keys(&["students.*"]);
        assert_eq!(
            apply_ceiling(&runtime, &plan),
            keys(&["students.view", "students.manage"])
        );
    }
}
