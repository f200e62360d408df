//! Enum types shared by the executor and the store abstraction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ISOLATION LEVEL
// ============================================================================

/// Transaction isolation level requested when opening a session.
///
/// Ordered from weakest to strictest, so `a < b` means `b` is stricter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Parse from database string representation (case and separator insensitive).
    pub fn from_db_str(s: &str) -> Result<Self, IsolationLevelParseError> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "readcommitted" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" => Ok(IsolationLevel::RepeatableRead),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(IsolationLevelParseError(s.to_string())),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = IsolationLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid isolation level string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationLevelParseError(pub String);

impl fmt::Display for IsolationLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid isolation level: {}", self.0)
    }
}

impl std::error::Error for IsolationLevelParseError {}

// ============================================================================
// ACCESS MODE
// ============================================================================

/// Whether a session may persist changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Rolled back at the end of the unit of work, writes are rejected
    ReadOnly,
    /// Committed at the end of the unit of work
    ReadWrite,
}

impl AccessMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

// ============================================================================
// STORE ERROR CODES
// ============================================================================

/// Closed set of backing-store failure codes the core knows how to classify.
///
/// Raw, store-specific codes are mapped onto this set by
/// [`ErrorCodeMap`](crate::ErrorCodeMap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreErrorCode {
    Deadlock,
    SerializationFailure,
    /// Row version changed underneath an optimistic update
    ConcurrencyConflict,
    TooManyConnections,
    OutOfMemory,
    InsufficientResources,
    DiskFull,
    /// Query or transaction cancelled by the caller
    Cancelled,
    Unclassified,
}

impl StoreErrorCode {
    /// Stable name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorCode::Deadlock => "deadlock",
            StoreErrorCode::SerializationFailure => "serialization_failure",
            StoreErrorCode::ConcurrencyConflict => "concurrency_conflict",
            StoreErrorCode::TooManyConnections => "too_many_connections",
            StoreErrorCode::OutOfMemory => "out_of_memory",
            StoreErrorCode::InsufficientResources => "insufficient_resources",
            StoreErrorCode::DiskFull => "disk_full",
            StoreErrorCode::Cancelled => "cancelled",
            StoreErrorCode::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_ordering() {
        assert!(IsolationLevel::ReadCommitted < IsolationLevel::Serializable);
        assert!(IsolationLevel::ReadUncommitted < IsolationLevel::ReadCommitted);
        assert_eq!(
            [
                IsolationLevel::Serializable,
                IsolationLevel::ReadCommitted,
                IsolationLevel::Snapshot
            ]
            .iter()
            .max(),
            Some(&IsolationLevel::Serializable)
        );
    }

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!(
            "read committed".parse::<IsolationLevel>(),
            Ok(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            "REPEATABLE_READ".parse::<IsolationLevel>(),
            Ok(IsolationLevel::RepeatableRead)
        );
        assert_eq!(
            IsolationLevel::from_db_str(IsolationLevel::Serializable.as_db_str()),
            Ok(IsolationLevel::Serializable)
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_access_mode() {
        assert!(AccessMode::ReadOnly.is_read_only());
        assert!(!AccessMode::ReadWrite.is_read_only());
    }
}
