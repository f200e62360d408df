//! In-memory store implementation.
//!
//! A thread-safe [`Store`] backed by `RwLock`ed maps. Writes are buffered per
//! transaction and applied on commit. Call counters and a fault plan make it
//! the store of choice for exercising the executor and the caches.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use refdata_core::{EntityId, Record, StoreErrorCode, StoreFailure, Timestamp};
use serde::Serialize;

use crate::store::{SessionOptions, Store, StoreTransaction};

type Table = BTreeMap<EntityId, Record>;

/// Operation at which an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Open,
    Fetch,
    Probe,
    Write,
    Commit,
}

#[derive(Debug, Clone)]
struct Fault {
    point: FaultPoint,
    code: StoreErrorCode,
    remaining: u32,
}

/// Counters describing how the store has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub opened: u64,
    pub full_fetches: u64,
    pub probes: u64,
    pub writes: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicU64,
    full_fetches: AtomicU64,
    probes: AtomicU64,
    writes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// In-memory reference data store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    faults: Mutex<Vec<Fault>>,
    fetch_delay: Mutex<Duration>,
    last_options: Mutex<Option<SessionOptions>>,
    counters: Counters,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records directly, bypassing transactions.
    pub fn seed(&self, table: &str, records: impl IntoIterator<Item = Record>) -> Result<(), StoreFailure> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let entries = tables.entry(table.to_string()).or_default();
        for record in records {
            entries.insert(record.id, record);
        }
        Ok(())
    }

    /// Mutate a record in place, bypassing transactions.
    ///
    /// Returns false when the record does not exist.
    pub fn update<F>(&self, table: &str, id: EntityId, f: F) -> Result<bool, StoreFailure>
    where
        F: FnOnce(&mut Record),
    {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        match tables.get_mut(table).and_then(|t| t.get_mut(&id)) {
            Some(record) => {
                f(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read a committed record.
    pub fn get(&self, table: &str, id: EntityId) -> Result<Option<Record>, StoreFailure> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).and_then(|t| t.get(&id)).cloned())
    }

    /// Number of committed records in a table.
    pub fn len(&self, table: &str) -> Result<usize, StoreFailure> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).map(|t| t.len()).unwrap_or(0))
    }

    /// Make the next `times` operations at `point` fail with `code`.
    pub fn inject_failures(&self, point: FaultPoint, code: StoreErrorCode, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                point,
                code,
                remaining: times,
            });
        }
    }

    /// Remove every pending fault.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Sleep this long inside every full fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.fetch_delay.lock() {
            *current = delay;
        }
    }

    /// Options of the most recently opened session.
    pub fn last_session_options(&self) -> Option<SessionOptions> {
        self.last_options.lock().ok().and_then(|o| o.clone())
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            opened: c.opened.load(Ordering::SeqCst),
            full_fetches: c.full_fetches.load(Ordering::SeqCst),
            probes: c.probes.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }

    fn check_fault(&self, point: FaultPoint) -> Result<(), StoreFailure> {
        let mut faults = self.faults.lock().map_err(|_| poisoned())?;
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.point == point && f.remaining > 0)
        {
            fault.remaining -= 1;
            let code = fault.code;
            faults.retain(|f| f.remaining > 0);
            return Err(StoreFailure::new(
                code,
                format!("injected {} at {:?}", code, point),
            ));
        }
        Ok(())
    }
}

impl Store for InMemoryStore {
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn StoreTransaction + '_>, StoreFailure> {
        self.check_fault(FaultPoint::Open)?;
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_options.lock() {
            *last = Some(options.clone());
        }
        Ok(Box::new(InMemoryTransaction {
            store: self,
            pending: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum PendingWrite {
    Upsert(String, Record),
    Delete(String, EntityId),
}

struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    pending: Vec<PendingWrite>,
}

impl InMemoryTransaction<'_> {
    /// Committed rows of `table` with this transaction's own writes applied.
    fn visible(&self, table: &str) -> Result<Table, StoreFailure> {
        let tables = self.store.tables.read().map_err(|_| poisoned())?;
        let mut rows = tables.get(table).cloned().unwrap_or_default();
        drop(tables);

        for write in &self.pending {
            match write {
                PendingWrite::Upsert(t, record) if t == table => {
                    rows.insert(record.id, record.clone());
                }
                PendingWrite::Delete(t, id) if t == table => {
                    rows.remove(id);
                }
                _ => {}
            }
        }
        Ok(rows)
    }
}

impl StoreTransaction for InMemoryTransaction<'_> {
    fn fetch_all(&mut self, table: &str) -> Result<Vec<Record>, StoreFailure> {
        self.store.check_fault(FaultPoint::Fetch)?;
        self.store.counters.full_fetches.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .store
            .fetch_delay
            .lock()
            .map(|d| *d)
            .unwrap_or(Duration::ZERO);
        let rows = self.visible(table)?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(rows.into_values().collect())
    }

    fn max_modified(&mut self, table: &str) -> Result<Option<Timestamp>, StoreFailure> {
        self.store.check_fault(FaultPoint::Probe)?;
        self.store.counters.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .visible(table)?
            .values()
            .map(Record::effective_modified)
            .max())
    }

    fn upsert(&mut self, table: &str, record: Record) -> Result<(), StoreFailure> {
        self.store.check_fault(FaultPoint::Write)?;
        self.store.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.pending
            .push(PendingWrite::Upsert(table.to_string(), record));
        Ok(())
    }

    fn delete(&mut self, table: &str, id: EntityId) -> Result<bool, StoreFailure> {
        self.store.check_fault(FaultPoint::Write)?;
        self.store.counters.writes.fetch_add(1, Ordering::SeqCst);
        let existed = self.visible(table)?.contains_key(&id);
        self.pending.push(PendingWrite::Delete(table.to_string(), id));
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreFailure> {
        self.store.check_fault(FaultPoint::Commit)?;
        let mut tables = self.store.tables.write().map_err(|_| poisoned())?;
        for write in self.pending {
            match write {
                PendingWrite::Upsert(table, record) => {
                    tables.entry(table).or_default().insert(record.id, record);
                }
                PendingWrite::Delete(table, id) => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.remove(&id);
                    }
                }
            }
        }
        self.store.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreFailure> {
        self.store.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn poisoned() -> StoreFailure {
    StoreFailure::new(StoreErrorCode::Unclassified, "in-memory store lock poisoned")
}
