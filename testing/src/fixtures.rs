use std::sync::atomic::{AtomicU32, Ordering};

use warden_core::{TenantDescriptor, TenantKind};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

pub fn unique_tenant_id() -> String {
    unique_id("test-tenant")
}

/// Well-formed descriptor for `tenant_id`, with a schema name derived the
/// way provisioning does it.
pub fn descriptor(tenant_id: &str) -> TenantDescriptor {
    descriptor_with_kind(tenant_id, TenantKind::School)
}

pub fn descriptor_with_kind(tenant_id: &str, kind: TenantKind) -> TenantDescriptor {
    TenantDescriptor {
        id: tenant_id.to_string(),
        schema: format!("tenant_{}", tenant_id.replace('-', "_")),
        kind,
    }
}
