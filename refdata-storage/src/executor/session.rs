//! Unit-of-work session handed to executor callbacks.

use refdata_core::{
    AccessMode, EntityId, IsolationLevel, Record, RefDataResult, StoreError, StoreFailure,
};

use crate::cache::Watermark;
use crate::store::{SessionOptions, StoreTransaction};

/// Scoped handle bound to one store transaction.
///
/// Created by the executor for each attempt and consumed when the attempt
/// commits or rolls back. Callbacks only ever see `&mut` access, so a session
/// cannot escape its unit of work.
pub struct UnitOfWorkSession<'s> {
    tx: Box<dyn StoreTransaction + 's>,
    options: SessionOptions,
    attempt: u32,
}

impl<'s> UnitOfWorkSession<'s> {
    pub(crate) fn new(tx: Box<dyn StoreTransaction + 's>, options: SessionOptions, attempt: u32) -> Self {
        Self {
            tx,
            options,
            attempt,
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.options.isolation
    }

    pub fn access(&self) -> AccessMode {
        self.options.access
    }

    /// Caller identity bound to this session, `None` for isolated reads.
    pub fn identity(&self) -> Option<&str> {
        self.options.identity.as_deref()
    }

    /// Attempt number within the current executor call (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Read all records of a table.
    pub fn all(&mut self, table: &str) -> RefDataResult<Vec<Record>> {
        Ok(self.tx.fetch_all(table)?)
    }

    /// Probe the table's watermark, `Never` for an empty table.
    pub fn watermark(&mut self, table: &str) -> RefDataResult<Watermark> {
        Ok(Watermark::from(self.tx.max_modified(table)?))
    }

    /// Insert or replace a record. Rejected in read-only sessions.
    pub fn upsert(&mut self, table: &str, record: Record) -> RefDataResult<()> {
        self.ensure_writable(table)?;
        Ok(self.tx.upsert(table, record)?)
    }

    /// Delete a record. Rejected in read-only sessions.
    pub fn delete(&mut self, table: &str, id: EntityId) -> RefDataResult<bool> {
        self.ensure_writable(table)?;
        Ok(self.tx.delete(table, id)?)
    }

    fn ensure_writable(&self, table: &str) -> RefDataResult<()> {
        if self.options.access.is_read_only() {
            return Err(StoreError::ReadOnlySession {
                table: table.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn commit(self) -> Result<(), StoreFailure> {
        self.tx.commit()
    }

    pub(crate) fn rollback(self) -> Result<(), StoreFailure> {
        self.tx.rollback()
    }
}

impl std::fmt::Debug for UnitOfWorkSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkSession")
            .field("options", &self.options)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
