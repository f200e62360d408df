//! Backing-store abstraction.
//!
//! The core never talks SQL. A store hands out one transaction per
//! [`Store::open`] call; the transaction exposes the minimal repository
//! surface the caches and writers need.

use refdata_core::{AccessMode, EntityId, IsolationLevel, Record, StoreFailure, Timestamp};

/// Options used to open a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub isolation: IsolationLevel,
    pub access: AccessMode,
    /// Caller-scoped identity (audit user, tenant), absent for isolated reads
    pub identity: Option<String>,
}

impl SessionOptions {
    pub fn read(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            access: AccessMode::ReadOnly,
            identity: None,
        }
    }

    pub fn write(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            access: AccessMode::ReadWrite,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }
}

/// A backing store that can open transactions.
///
/// Implementations must be safe to share across threads; each call to
/// `open` returns an independent transaction bound to one connection.
pub trait Store: Send + Sync {
    /// Open a connection and begin a transaction.
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn StoreTransaction + '_>, StoreFailure>;
}

/// One open transaction against the backing store.
///
/// `commit` and `rollback` consume the transaction; dropping it without
/// either must behave like a rollback.
pub trait StoreTransaction: Send {
    /// Read every record of a table, including its localized names.
    fn fetch_all(&mut self, table: &str) -> Result<Vec<Record>, StoreFailure>;

    /// Maximum `modified` across the table and its joined name collection.
    ///
    /// Returns `None` for an empty table. This is the cheap freshness probe.
    fn max_modified(&mut self, table: &str) -> Result<Option<Timestamp>, StoreFailure>;

    /// Insert or replace a record.
    fn upsert(&mut self, table: &str, record: Record) -> Result<(), StoreFailure>;

    /// Delete a record, returning whether it existed.
    fn delete(&mut self, table: &str, id: EntityId) -> Result<bool, StoreFailure>;

    fn commit(self: Box<Self>) -> Result<(), StoreFailure>;

    fn rollback(self: Box<Self>) -> Result<(), StoreFailure>;
}
