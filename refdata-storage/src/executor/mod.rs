//! Transactional executor.
//!
//! Runs one unit of work against the backing store under a chosen isolation
//! level, classifies failures and retries transient ones with jittered
//! backoff.
//!
//! # Protocol
//!
//! ```text
//! open session ─→ action ─┬─ Ok ──→ commit (write) / rollback (read) ─→ done
//!      ↑                  └─ Err ─→ rollback ─→ classify
//!      │                                          ├─ Transient / ResourceExhausted, budget left
//!      └──────────── jittered sleep ←─────────────┘
//!                                                 └─ otherwise ─→ surface error
//! ```
//!
//! An executor instance runs at most one unit of work at a time. A second
//! concurrent call gets [`StoreError::AlreadyInUse`] instead of interleaving.

pub mod backoff;
pub mod cancel;
pub mod classify;
pub mod session;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use refdata_core::{
    ExecutorConfig, RefDataError, RefDataResult, StoreError, StoreErrorCode, StoreFailure,
};
use serde::Serialize;

pub use backoff::{backoff_ceiling, jittered_delay};
pub use cancel::CancellationToken;
pub use classify::{classify, classify_code, FailureClass};
pub use session::UnitOfWorkSession;

use crate::store::{SessionOptions, Store};

/// Kind of unit of work, selecting isolation, access mode and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfWorkKind {
    /// Read with the caller's identity at the read isolation level
    Read,
    /// Read without the caller's identity (background refreshes)
    IsolatedRead,
    /// Serializable read-write transaction
    Write,
}

impl fmt::Display for UnitOfWorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOfWorkKind::Read => write!(f, "read"),
            UnitOfWorkKind::IsolatedRead => write!(f, "isolated_read"),
            UnitOfWorkKind::Write => write!(f, "write"),
        }
    }
}

/// Snapshot of executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Sessions opened (one per attempt)
    pub attempts: u64,
    pub retries: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// Wall time of the most recent completed call
    pub last_elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    retries: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    last_elapsed_us: AtomicU64,
}

/// Runs units of work with isolation selection, classification and retry.
///
/// Cheap to construct; the usual pattern is one executor per request sharing
/// an `Arc<dyn Store>`.
pub struct TransactionalExecutor {
    store: Arc<dyn Store>,
    config: ExecutorConfig,
    identity: Option<String>,
    cancel: CancellationToken,
    in_flight: Mutex<()>,
    counters: Counters,
}

impl TransactionalExecutor {
    /// Create an executor over `store`.
    pub fn new(store: Arc<dyn Store>, config: ExecutorConfig) -> Self {
        Self {
            store,
            config,
            identity: None,
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Create an executor with default configuration.
    pub fn with_defaults(store: Arc<dyn Store>) -> Self {
        Self::new(store, ExecutorConfig::default())
    }

    /// Bind a caller-scoped identity passed to non-isolated sessions.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Share a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this executor's units of work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn stats(&self) -> ExecutorStats {
        let c = &self.counters;
        ExecutorStats {
            attempts: c.attempts.load(Ordering::SeqCst),
            retries: c.retries.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
            last_elapsed: Duration::from_micros(c.last_elapsed_us.load(Ordering::SeqCst)),
        }
    }

    /// Run a read. The transaction is always rolled back.
    pub fn execute_read<T, F>(&self, action: F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        self.execute(UnitOfWorkKind::Read, action)
    }

    /// Run a read that does not inherit the caller's identity.
    pub fn execute_isolated_read<T, F>(&self, action: F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        self.execute(UnitOfWorkKind::IsolatedRead, action)
    }

    /// Run a serializable write, committed on success.
    pub fn execute_write<T, F>(&self, action: F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        self.execute(UnitOfWorkKind::Write, action)
    }

    /// Run a unit of work of the given kind.
    pub fn execute<T, F>(&self, kind: UnitOfWorkKind, mut action: F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        // A poisoned guard only means an earlier action panicked; the unit
        // tuple it protects carries no state.
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(StoreError::AlreadyInUse.into()),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let _span = tracing::debug_span!("unit_of_work", kind = %kind).entered();
        let options = self.session_options(kind);
        let started = Instant::now();
        let result = self.run_with_retry(&options, &mut action);
        let elapsed = started.elapsed();
        self.counters.last_elapsed_us.store(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );

        if self.config.diagnostics {
            tracing::debug!(
                kind = %kind,
                isolation = %options.isolation,
                elapsed_us = elapsed.as_micros() as u64,
                ok = result.is_ok(),
                "Unit of work finished"
            );
        }
        result
    }

    fn session_options(&self, kind: UnitOfWorkKind) -> SessionOptions {
        match kind {
            UnitOfWorkKind::Read => SessionOptions::read(self.config.read_isolation)
                .with_identity(self.identity.clone()),
            UnitOfWorkKind::IsolatedRead => SessionOptions::read(self.config.read_isolation),
            UnitOfWorkKind::Write => SessionOptions::write(self.config.write_isolation)
                .with_identity(self.identity.clone()),
        }
    }

    fn run_with_retry<T, F>(&self, options: &SessionOptions, action: &mut F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        let mut retries: u32 = 0;
        let mut resource_retries: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(StoreError::Cancelled.into());
            }

            let attempt = retries + 1;
            let err = match self.attempt(options, attempt, action) {
                Ok(value) => {
                    if retries > 0 {
                        tracing::info!(attempt, retries, "Unit of work succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            // Non-store errors (cache misses, validation) are the caller's business.
            let failure = match err.as_store_failure() {
                Some(failure) => failure.clone(),
                None => return Err(err),
            };

            match classify(&failure) {
                FailureClass::Cancelled => {
                    tracing::debug!(attempt, "Unit of work cancelled by store");
                    return Err(StoreError::Cancelled.into());
                }
                FailureClass::Permanent | FailureClass::Unknown => {
                    tracing::warn!(attempt, code = %failure.code, error = %failure.message, "Permanent store failure");
                    return Err(StoreError::Permanent { failure }.into());
                }
                FailureClass::Transient => {
                    if retries >= self.config.retry_budget {
                        return Err(exhausted(failure, attempt));
                    }
                }
                FailureClass::ResourceExhausted => {
                    if retries >= self.config.retry_budget
                        || resource_retries >= self.config.resource_retry_limit()
                    {
                        return Err(exhausted(failure, attempt));
                    }
                    resource_retries += 1;
                }
            }

            retries += 1;
            self.counters.retries.fetch_add(1, Ordering::SeqCst);
            let delay = jittered_delay(retries, self.config.base_delay, self.config.max_delay);
            tracing::warn!(
                attempt,
                retry = retries,
                budget = self.config.retry_budget,
                code = %failure.code,
                delay_ms = delay.as_millis() as u64,
                "Transient store failure, retrying"
            );

            if self.cancel.wait_timeout(delay) {
                return Err(StoreError::Cancelled.into());
            }
        }
    }

    fn attempt<T, F>(&self, options: &SessionOptions, attempt: u32, action: &mut F) -> RefDataResult<T>
    where
        F: FnMut(&mut UnitOfWorkSession<'_>) -> RefDataResult<T>,
    {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        let tx = self.store.open(options)?;
        let mut session = UnitOfWorkSession::new(tx, options.clone(), attempt);

        match action(&mut session) {
            Ok(value) => {
                if options.access.is_read_only() {
                    // Reads never persist; rollback just releases the connection.
                    self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
                    if let Err(failure) = session.rollback() {
                        tracing::warn!(attempt, error = %failure, "Rollback after read failed");
                    }
                } else {
                    session.commit()?;
                    self.counters.commits.fetch_add(1, Ordering::SeqCst);
                }
                Ok(value)
            }
            Err(err) => {
                self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
                if let Err(failure) = session.rollback() {
                    tracing::debug!(attempt, error = %failure, "Rollback after failed attempt failed");
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for TransactionalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalExecutor")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Error for a retryable failure that ran out of budget.
fn exhausted(failure: StoreFailure, attempts: u32) -> RefDataError {
    if failure.code == StoreErrorCode::TooManyConnections {
        StoreError::ResourceExhausted { failure, attempts }.into()
    } else {
        StoreError::Transient { failure, attempts }.into()
    }
}
