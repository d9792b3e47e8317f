//! Error taxonomy shared across the Warden workspace.
//!
//! Three families: [`ResolveError`] is what callers of the resolution
//! pipeline see, [`DataSourceError`] covers tenant repositories and the
//! platform directory, and [`CacheError`] covers the distributed cache.
//! Cache failures are never fatal to a resolution; data-source failures
//! carry their own transient classification so the retry layer can decide
//! without downcasting.

use thiserror::Error;

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors surfaced to callers of `resolve` and the invalidation APIs.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid tenant context: {reason}")]
    InvalidTenant { reason: String },

    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}

impl ResolveError {
    pub fn invalid_tenant(reason: impl Into<String>) -> Self {
        ResolveError::InvalidTenant {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for response mapping.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::InvalidTenant { .. } => "INVALID_TENANT",
            ResolveError::DataSource(err) => err.code(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::InvalidTenant { .. } => false,
            ResolveError::DataSource(err) => err.is_transient(),
        }
    }
}

/// Failures raised by tenant repositories and the platform directory.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("connection to {source_name} failed: {message}")]
    Connection {
        source_name: &'static str,
        message: String,
    },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("query against {source_name} failed: {message}")]
    Query {
        source_name: &'static str,
        message: String,
    },

    #[error("connection pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("data source unavailable: {message}")]
    Unavailable { message: String },

    #[error("circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("circuit half-open, probe already in flight")]
    CircuitHalfOpen,
}

impl DataSourceError {
    /// Whether a retry has any chance of succeeding. Circuit rejections are
    /// deliberate refusals, not faults, so they are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            DataSourceError::Connection { .. }
            | DataSourceError::Timeout { .. }
            | DataSourceError::PoolExhausted { .. }
            | DataSourceError::Unavailable { .. } => true,
            DataSourceError::Query { message, .. } => is_transient_signature(message),
            DataSourceError::CircuitOpen { .. } | DataSourceError::CircuitHalfOpen => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            DataSourceError::CircuitOpen { retry_after_ms } => Some(*retry_after_ms),
            DataSourceError::CircuitHalfOpen => Some(1000),
            DataSourceError::Timeout { .. } => Some(1000),
            DataSourceError::Connection { .. }
            | DataSourceError::PoolExhausted { .. }
            | DataSourceError::Unavailable { .. } => Some(5000),
            DataSourceError::Query { .. } => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DataSourceError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            DataSourceError::CircuitHalfOpen => "CIRCUIT_HALF_OPEN",
            DataSourceError::Timeout { .. } => "DATA_SOURCE_TIMEOUT",
            _ => "DATA_SOURCE_ERROR",
        }
    }
}

/// Classifies driver errors that arrive as strings. Matches the transient
/// signatures seen from Postgres drivers and connection pools: network
/// resets, DNS, pool pressure, deadlocks and serialization conflicts.
pub fn is_transient_signature(message: &str) -> bool {
    const SIGNATURES: &[&str] = &[
        "connection refused",
        "connection reset",
        "connection closed",
        "broken pipe",
        "timed out",
        "timeout",
        "getaddrinfo",
        "dns error",
        "pool exhausted",
        "pool timed out",
        "too many connections",
        "deadlock detected",
        "serialization failure",
        "40001",
        "40p01",
        "53300",
        "57p03",
    ];
    let lowered = message.to_lowercase();
    SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Distributed cache failures. Always non-fatal: readers treat them as a
/// miss, writers log and move on.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache operation error: {0}")]
    Operation(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        "CACHE_ERROR"
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(
            DataSourceError::Connection {
                source_name: "postgres",
                message: "refused".into()
            }
            .is_transient()
        );
        assert!(DataSourceError::Timeout { elapsed_ms: 5000 }.is_transient());
        assert!(
            DataSourceError::PoolExhausted {
                message: "all 10 connections busy".into()
            }
            .is_transient()
        );

        assert!(
            !DataSourceError::Query {
                source_name: "postgres",
                message: "syntax error at or near SELECT".into()
            }
            .is_transient()
        );
        assert!(!DataSourceError::CircuitOpen { retry_after_ms: 500 }.is_transient());
        assert!(!DataSourceError::CircuitHalfOpen.is_transient());
    }

    #[test]
    fn test_query_transient_by_signature() {
        let deadlock = DataSourceError::Query {
            source_name: "postgres",
            message: "ERROR: deadlock detected (SQLSTATE 40P01)".into(),
        };
        assert!(deadlock.is_transient());

        let conflict = DataSourceError::Query {
            source_name: "postgres",
            message: "could not serialize access (40001)".into(),
        };
        assert!(conflict.is_transient());
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(
            DataSourceError::CircuitOpen {
                retry_after_ms: 12_000
            }
            .retry_after_ms(),
            Some(12_000)
        );
        assert_eq!(
            DataSourceError::Timeout { elapsed_ms: 3000 }.retry_after_ms(),
            Some(1000)
        );
        assert_eq!(
            DataSourceError::Query {
                source_name: "postgres",
                message: "bad column".into()
            }
            .retry_after_ms(),
            None
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ResolveError::invalid_tenant("missing schema").code(),
            "INVALID_TENANT"
        );
        assert_eq!(
            ResolveError::from(DataSourceError::CircuitOpen { retry_after_ms: 1 }).code(),
            "CIRCUIT_OPEN"
        );
        assert_eq!(CacheError::Connection("down".into()).code(), "CACHE_ERROR");
    }

    #[test]
    fn test_signature_matcher_case_insensitive() {
        assert!(is_transient_signature("Connection Refused by host"));
        assert!(is_transient_signature("ERROR 53300: too many connections"));
        assert!(!is_transient_signature("permission denied for table users"));
    }
}
