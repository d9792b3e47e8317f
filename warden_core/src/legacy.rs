//! Translation shim for permission keys minted before the dot-namespaced
//! scheme. Every tenant-sourced grant passes through [`normalize_key`] so
//! stored rows keep working until the data migration rewrites them; this
//! module can be deleted once that migration has run everywhere.

use std::collections::BTreeSet;

use crate::types::PermissionKey;

static LEGACY_KEY_MAP: &[(&str, &str)] = &[
    ("VIEW_STUDENTS", "students.view"),
    ("MANAGE_STUDENTS", "students.manage"),
    ("ADMIT_STUDENTS", "students.admissions.manage"),
    ("MARK_ATTENDANCE", "attendance.mark"),
    ("VIEW_ATTENDANCE", "attendance.view"),
    ("COLLECT_FEES", "fees.collect"),
    ("VIEW_FEES", "fees.view"),
    ("MANAGE_EXAMS", "exams.manage"),
    ("VIEW_EXAM_RESULTS", "exams.results.view"),
    ("EXPORT_REPORTS", "reports.export"),
    ("VIEW_REPORTS", "reports.view"),
    ("MANAGE_TIMETABLE", "timetable.manage"),
    ("VIEW_TIMETABLE", "timetable.view"),
    ("MANAGE_LIBRARY", "library.manage"),
    ("MANAGE_STAFF", "staff.manage"),
    ("VIEW_STAFF", "staff.view"),
    ("MANAGE_SETTINGS", "settings.manage"),
    ("MANAGE_ROLES", "settings.rbac.manage"),
];

pub fn map_legacy_key(raw: &str) -> Option<&'static str> {
    LEGACY_KEY_MAP
        .iter()
        .find(|(old, _)| *old == raw)
        .map(|(_, current)| *current)
}

/// Normalizes one stored key: current-scheme keys pass untouched, known
/// legacy keys are rewritten, and unknown shapes are logged and passed
/// through raw so one bad row cannot fail a load.
pub fn normalize_key(raw: &str) -> PermissionKey {
    if let Some(key) = PermissionKey::new(raw) {
        return key;
    }
    if let Some(mapped) = map_legacy_key(raw) {
        if let Some(key) = PermissionKey::new(mapped) {
            return key;
        }
    }
    tracing::warn!(key = %raw, "unmapped legacy permission key, passing through");
    PermissionKey::from_raw(raw)
}

pub fn normalize_keys<I, S>(raw_keys: I) -> BTreeSet<PermissionKey>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_keys
        .into_iter()
        .map(|raw| normalize_key(raw.as_ref()))
        .collect()
}
