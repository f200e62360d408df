//! Error types for REFDATA operations

use crate::StoreErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw failure reported by the backing store.
///
/// Carries the classified code alongside the store's own code so callers can
/// log what the store actually said.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code} ({}): {message}", .raw_code.as_deref().unwrap_or("-"))]
pub struct StoreFailure {
    pub code: StoreErrorCode,
    pub raw_code: Option<String>,
    pub message: String,
}

impl StoreFailure {
    /// Create a failure with an already classified code.
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            raw_code: None,
            message: message.into(),
        }
    }

    /// Create a failure from a store-specific code, resolved through `map`.
    pub fn from_raw(
        raw_code: impl Into<String>,
        message: impl Into<String>,
        map: &crate::ErrorCodeMap,
    ) -> Self {
        let raw_code = raw_code.into();
        Self {
            code: map.resolve(&raw_code),
            raw_code: Some(raw_code),
            message: message.into(),
        }
    }

    /// Shorthand for a caller-initiated cancellation.
    pub fn cancelled() -> Self {
        Self::new(StoreErrorCode::Cancelled, "unit of work cancelled")
    }
}

/// Store and transaction errors surfaced by the executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Unclassified failure straight from the store (before the executor sees it).
    #[error("Store failure: {0}")]
    Failure(StoreFailure),

    #[error("Transient store failure after {attempts} attempt(s): {failure}")]
    Transient { failure: StoreFailure, attempts: u32 },

    #[error("Permanent store failure: {failure}")]
    Permanent { failure: StoreFailure },

    #[error("Store resources exhausted after {attempts} attempt(s): {failure}")]
    ResourceExhausted { failure: StoreFailure, attempts: u32 },

    #[error("Unit of work cancelled")]
    Cancelled,

    #[error("Executor already in use")]
    AlreadyInUse,

    #[error("Write attempted in read-only session on {table}")]
    ReadOnlySession { table: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache lookup and lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache key not found: {taxonomy} with key {key}")]
    KeyNotFound { taxonomy: String, key: String },

    #[error("Cache not registered: {taxonomy}")]
    NotRegistered { taxonomy: String },

    #[error("Global cache registry already installed")]
    GlobalAlreadyInstalled,

    #[error("Global cache registry not installed")]
    GlobalNotInstalled,

    #[error("Cache lock poisoned: {cache}")]
    LockPoisoned { cache: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all REFDATA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefDataError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreFailure> for RefDataError {
    fn from(failure: StoreFailure) -> Self {
        RefDataError::Store(StoreError::Failure(failure))
    }
}

impl RefDataError {
    /// The raw store failure, if this error has not been classified yet.
    pub fn as_store_failure(&self) -> Option<&StoreFailure> {
        match self {
            RefDataError::Store(StoreError::Failure(failure)) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RefDataError::Store(StoreError::Cancelled))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RefDataError::Cache(CacheError::KeyNotFound { .. }))
    }
}

/// Result type alias for REFDATA operations.
pub type RefDataResult<T> = Result<T, RefDataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCodeMap;

    #[test]
    fn test_store_failure_display() {
        let failure = StoreFailure::from_raw("40P01", "deadlock detected", &ErrorCodeMap::postgres());
        let msg = format!("{}", failure);
        assert!(msg.contains("deadlock"));
        assert!(msg.contains("40P01"));
        assert!(msg.contains("deadlock detected"));
    }

    #[test]
    fn test_cache_error_display_key_not_found() {
        let err = CacheError::KeyNotFound {
            taxonomy: "country".to_string(),
            key: "XX".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("country"));
        assert!(msg.contains("XX"));
    }

    #[test]
    fn test_store_error_display_resource_exhausted() {
        let err = StoreError::ResourceExhausted {
            failure: StoreFailure::new(StoreErrorCode::TooManyConnections, "pool empty"),
            attempts: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("4 attempt"));
        assert!(msg.contains("too_many_connections"));
    }

    #[test]
    fn test_refdata_error_from_variants() {
        let store = RefDataError::from(StoreError::AlreadyInUse);
        assert!(matches!(store, RefDataError::Store(_)));

        let cache = RefDataError::from(CacheError::GlobalNotInstalled);
        assert!(matches!(cache, RefDataError::Cache(_)));

        let config = RefDataError::from(ConfigError::InvalidValue {
            field: "retry_budget".to_string(),
            value: "100".to_string(),
            reason: "too large".to_string(),
        });
        assert!(matches!(config, RefDataError::Config(_)));

        let raw = RefDataError::from(StoreFailure::cancelled());
        assert_eq!(
            raw.as_store_failure().map(|f| f.code),
            Some(StoreErrorCode::Cancelled)
        );
        assert!(!raw.is_cancelled());
        assert!(RefDataError::from(StoreError::Cancelled).is_cancelled());
    }
}
