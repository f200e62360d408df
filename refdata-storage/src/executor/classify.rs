//! Failure classification for the retry loop.
//!
//! A closed, pure mapping from store failure codes to retry behavior. Kept
//! apart from the loop so the table can be tested on its own.

use refdata_core::{StoreErrorCode, StoreFailure};

/// How the executor treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Expected to clear up on retry (deadlock, serialization conflict)
    Transient,
    /// Temporary resource pressure, retried under a tighter cap
    ResourceExhausted,
    /// Will fail again, surfaced immediately
    Permanent,
    /// Caller cancelled, surfaced immediately and never retried
    Cancelled,
    /// Code not known to the classifier, handled like `Permanent`
    Unknown,
}

impl FailureClass {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::ResourceExhausted)
    }
}

/// Classify a store failure code.
pub fn classify_code(code: StoreErrorCode) -> FailureClass {
    match code {
        StoreErrorCode::Deadlock
        | StoreErrorCode::SerializationFailure
        | StoreErrorCode::ConcurrencyConflict => FailureClass::Transient,
        StoreErrorCode::TooManyConnections
        | StoreErrorCode::OutOfMemory
        | StoreErrorCode::InsufficientResources => FailureClass::ResourceExhausted,
        StoreErrorCode::DiskFull => FailureClass::Permanent,
        StoreErrorCode::Cancelled => FailureClass::Cancelled,
        StoreErrorCode::Unclassified => FailureClass::Unknown,
    }
}

/// Classify a store failure.
pub fn classify(failure: &StoreFailure) -> FailureClass {
    classify_code(failure.code)
}
