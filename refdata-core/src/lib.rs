//! REFDATA Core - Record Types, Errors and Configuration
//!
//! Pure data structures shared by the storage and cache crates.
//! This crate contains no I/O and no caching logic.

pub mod config;
pub mod enums;
pub mod error;
pub mod identity;
pub mod record;

pub use config::{CacheConfig, ErrorCodeMap, ExecutorConfig, RefDataConfig};
pub use enums::{AccessMode, IsolationLevel, IsolationLevelParseError, StoreErrorCode};
pub use error::{
    CacheError, ConfigError, RefDataError, RefDataResult, StoreError, StoreFailure,
};
pub use identity::{new_entity_id, EntityId, Timestamp};
pub use record::{LocalizedName, Record};
