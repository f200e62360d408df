//! Timestamped snapshot cache.
//!
//! The engine behind every reference-data cache: an immutable keyed snapshot
//! published through an atomically swapped `Arc`, refreshed when the store's
//! watermark moves past the one the snapshot was built at.
//!
//! # Consistency
//!
//! Readers clone the current `Arc` and never block on a reload. A reload
//! probes the watermark and fetches the working set inside one isolated read,
//! so the recorded watermark never claims more freshness than the data it
//! was stored with. The recorded watermark is `max(previous, probed)` and
//! therefore never moves backwards.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use refdata_core::{CacheError, ExecutorConfig, RefDataError, RefDataResult, Timestamp};
use tracing::{debug, info, trace, warn};

use super::policy::RefreshPolicy;
use super::traits::{CacheStats, RefreshableCache};
use super::watermark::Watermark;
use crate::executor::{CancellationToken, TransactionalExecutor, UnitOfWorkSession};
use crate::store::Store;

/// Reads the store's current watermark for a cache's tables.
pub type ProbeFn = dyn Fn(&mut UnitOfWorkSession<'_>) -> RefDataResult<Watermark> + Send + Sync;

/// Fetches a cache's full working set.
pub type LoadFn<K, V> =
    dyn Fn(&mut UnitOfWorkSession<'_>) -> RefDataResult<HashMap<K, V>> + Send + Sync;

/// Immutable keyed view of a table at one watermark.
#[derive(Debug, Clone)]
pub struct Snapshot<K, V> {
    entries: HashMap<K, V>,
    watermark: Watermark,
    built_at: Timestamp,
    version: u64,
}

impl<K: Eq + Hash, V> Snapshot<K, V> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            watermark: Watermark::Never,
            built_at: Utc::now(),
            version: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Watermark the snapshot was built at.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn built_at(&self) -> Timestamp {
        self.built_at
    }

    /// Monotonic build counter, 0 for the placeholder before the first load.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    probes: AtomicU64,
    loads: AtomicU64,
}

/// Versioned, watermark-refreshed cache over one logical table.
pub struct SnapshotCache<K, V> {
    name: String,
    store: Arc<dyn Store>,
    executor_config: ExecutorConfig,
    cancel: CancellationToken,
    policy: RefreshPolicy,
    probe: Box<ProbeFn>,
    load: Box<LoadFn<K, V>>,
    current: RwLock<Arc<Snapshot<K, V>>>,
    load_lock: Mutex<()>,
    last_probe: Mutex<Option<Instant>>,
    counters: Counters,
}

/// Builder for [`SnapshotCache`].
pub struct SnapshotCacheBuilder<K, V> {
    name: String,
    store: Arc<dyn Store>,
    probe: Box<ProbeFn>,
    load: Box<LoadFn<K, V>>,
    policy: RefreshPolicy,
    executor_config: ExecutorConfig,
    cancel: CancellationToken,
}

impl<K, V> SnapshotCacheBuilder<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Token shared by every load this cache performs.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the cache. Eager caches load before returning.
    pub fn build(self) -> RefDataResult<SnapshotCache<K, V>> {
        let cache = SnapshotCache {
            name: self.name,
            store: self.store,
            executor_config: self.executor_config,
            cancel: self.cancel,
            policy: self.policy,
            probe: self.probe,
            load: self.load,
            current: RwLock::new(Arc::new(Snapshot::empty())),
            load_lock: Mutex::new(()),
            last_probe: Mutex::new(None),
            counters: Counters::default(),
        };
        if cache.policy.is_eager() {
            cache.rebuild()?;
        }
        Ok(cache)
    }
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Start building a cache from a watermark probe and a working-set loader.
    pub fn builder<P, L>(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        probe: P,
        load: L,
    ) -> SnapshotCacheBuilder<K, V>
    where
        P: Fn(&mut UnitOfWorkSession<'_>) -> RefDataResult<Watermark> + Send + Sync + 'static,
        L: Fn(&mut UnitOfWorkSession<'_>) -> RefDataResult<HashMap<K, V>> + Send + Sync + 'static,
    {
        SnapshotCacheBuilder {
            name: name.into(),
            store,
            probe: Box::new(probe),
            load: Box::new(load),
            policy: RefreshPolicy::Eager,
            executor_config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Current snapshot, refreshing first when a lazy cache's window elapsed.
    ///
    /// A lazy cache that fails to refresh keeps serving its previous snapshot;
    /// the error only surfaces when there is no snapshot to fall back to.
    pub fn get_snapshot(&self) -> RefDataResult<Arc<Snapshot<K, V>>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        if let RefreshPolicy::Lazy {
            min_refresh_interval,
        } = self.policy
        {
            if self.probe_due(min_refresh_interval) {
                if let Err(err) = self.load() {
                    if self.current().version() == 0 {
                        return Err(err);
                    }
                    warn!(
                        cache = %self.name,
                        error = %err,
                        "Refresh failed, serving previous snapshot"
                    );
                }
            }
        }

        Ok(self.current())
    }

    /// Current snapshot without consulting the store.
    pub fn current(&self) -> Arc<Snapshot<K, V>> {
        // The slot only ever holds a complete snapshot, so a poisoned guard is
        // still safe to read.
        let slot = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot)
    }

    /// Probe the store and report whether it holds data newer than the
    /// current snapshot. A cache that has never seen data always needs one.
    pub fn needs_refresh(&self) -> RefDataResult<bool> {
        let probed = self.probe_store()?;
        let current = self.current().watermark();
        let stale = current.is_never() || probed.is_newer_than(&current);
        trace!(cache = %self.name, %current, %probed, stale, "Probed watermark");
        Ok(stale)
    }

    /// Reload if the store moved. Concurrent callers coalesce onto one load.
    ///
    /// Returns whether this call swapped in a new snapshot.
    pub fn load(&self) -> RefDataResult<bool> {
        if !self.needs_refresh()? {
            return Ok(false);
        }

        let _guard = self.load_lock.lock().map_err(|_| self.poisoned())?;

        // Whoever held the lock may already have loaded what we saw.
        if !self.needs_refresh()? {
            debug!(cache = %self.name, "Snapshot already refreshed by a concurrent load");
            return Ok(false);
        }

        self.reload()?;
        Ok(true)
    }

    /// Reload unconditionally.
    pub fn rebuild(&self) -> RefDataResult<()> {
        let _guard = self.load_lock.lock().map_err(|_| self.poisoned())?;
        self.reload()
    }

    /// Same as [`load`](Self::load); also restarts a lazy cache's window.
    pub fn check_and_refresh(&self) -> RefDataResult<bool> {
        if let Ok(mut last) = self.last_probe.lock() {
            *last = Some(Instant::now());
        }
        self.load()
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.current();
        CacheStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            probes: self.counters.probes.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            entry_count: snapshot.len() as u64,
            version: snapshot.version(),
        }
    }

    fn executor(&self) -> TransactionalExecutor {
        TransactionalExecutor::new(Arc::clone(&self.store), self.executor_config.clone())
            .with_cancellation(self.cancel.clone())
    }

    fn probe_store(&self) -> RefDataResult<Watermark> {
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        self.executor()
            .execute_isolated_read(|session| (self.probe)(session))
    }

    fn probe_due(&self, interval: Duration) -> bool {
        let mut last = self
            .last_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let due = self.current().version() == 0
            || last.map_or(true, |at| at.elapsed() >= interval);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    /// Fetch and publish a new snapshot. Caller holds `load_lock`.
    fn reload(&self) -> RefDataResult<()> {
        let started = Instant::now();
        let (probed, entries) = self.executor().execute_isolated_read(|session| {
            let watermark = (self.probe)(session)?;
            let entries = (self.load)(session)?;
            Ok((watermark, entries))
        })?;
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        self.counters.loads.fetch_add(1, Ordering::Relaxed);

        let previous = self.current();
        let snapshot = Snapshot {
            entries,
            watermark: previous.watermark().merge(probed),
            built_at: Utc::now(),
            version: previous.version() + 1,
        };

        info!(
            cache = %self.name,
            entries = snapshot.len(),
            watermark = %snapshot.watermark,
            version = snapshot.version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Snapshot loaded"
        );

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(snapshot);
        Ok(())
    }

    fn poisoned(&self) -> RefDataError {
        CacheError::LockPoisoned {
            cache: self.name.clone(),
        }
        .into()
    }
}

impl<K, V> RefreshableCache for SnapshotCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check_and_refresh(&self) -> RefDataResult<bool> {
        SnapshotCache::check_and_refresh(self)
    }

    fn rebuild(&self) -> RefDataResult<()> {
        SnapshotCache::rebuild(self)
    }

    fn watermark(&self) -> Watermark {
        self.current().watermark()
    }

    fn stats(&self) -> CacheStats {
        SnapshotCache::stats(self)
    }
}

impl<K, V> fmt::Debug for SnapshotCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
