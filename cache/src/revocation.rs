use std::sync::Arc;
use std::time::Duration;

use errors::CacheError;
use resilience::DegradationService;
use tracing::warn;

use crate::store::CacheStore;

pub const DEFAULT_REVOCATION_PREFIX: &str = "authz:revoked";

/// Outcome of a marker write. `SkippedDegraded` is a deliberate gap: while
/// the distributed store is down a revocation cannot reach other nodes, so
/// recording it locally would only pretend it took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerWrite {
    Written,
    SkippedDegraded,
}

/// Session revocation markers. A marker's presence means the session was
/// force-expired before its natural TTL; callers treat an unknown state as
/// "go ask the database", never as revoked.
pub struct RevocationMarkers {
    store: Arc<dyn CacheStore>,
    degradation: Option<Arc<DegradationService>>,
    prefix: String,
}

impl RevocationMarkers {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            degradation: None,
            prefix: DEFAULT_REVOCATION_PREFIX.to_string(),
        }
    }

    pub fn with_degradation(mut self, service: Arc<DegradationService>) -> Self {
        self.degradation = Some(service);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn marker_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.prefix, session_id)
    }

    fn is_degraded(&self) -> bool {
        self.degradation
            .as_ref()
            .is_some_and(|service| service.is_degraded())
    }

    /// Marks the session revoked for `ttl`, which should cover the session's
    /// remaining natural lifetime. Unlike context writes this surfaces store
    /// errors, because a silently dropped revocation leaves a session alive.
    pub async fn mark_revoked(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> Result<MarkerWrite, CacheError> {
        if self.is_degraded() {
            warn!(
                session_id,
                "session revocation marker skipped in degraded mode; session remains valid until the store recovers"
            );
            return Ok(MarkerWrite::SkippedDegraded);
        }
        self.store
            .set_ex(&self.marker_key(session_id), "1", ttl)
            .await?;
        Ok(MarkerWrite::Written)
    }

    /// `Some(true)` revoked, `Some(false)` not revoked, `None` unknown. An
    /// unknown answer means the caller must fall back to its authoritative
    /// source instead of assuming either way.
    pub async fn check_revoked(&self, session_id: &str) -> Option<bool> {
        if self.is_degraded() {
            return None;
        }
        match self.store.get(&self.marker_key(session_id)).await {
            Ok(found) => Some(found.is_some()),
            Err(err) => {
                warn!(session_id, error = %err, "revocation marker lookup failed");
                None
            }
        }
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), CacheError> {
        self.store.delete(&self.marker_key(session_id)).await
    }
}
