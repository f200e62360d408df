//! REFDATA Storage - Transactional Executor and Snapshot Caches
//!
//! Runs units of work against a backing [`Store`] with retry, isolation and
//! cancellation handling, and keeps reference data in memory as immutable
//! snapshots refreshed by watermark probes.
//!
//! The [`Store`] trait is the only seam to a real database; [`InMemoryStore`]
//! implements it for tests and embedders.

pub mod cache;
pub mod executor;
pub mod memory;
pub mod scheduler;
pub mod store;

pub use cache::{
    code_table, compress_to_three_levels, global, install_global, normalize_postal_code,
    postal_codes, record_table, table_probe, CacheRegistry, CacheStats, Forest,
    HierarchicalCache, Hierarchy, HierarchyNode, HierarchyOptions, HierarchyShape,
    RefreshPolicy, RefreshSummary, RefreshableCache, RegistryBuilder, Snapshot, SnapshotCache,
    SnapshotCacheBuilder, Taxonomy, TaxonomyCache, TreeNode, Watermark,
};
pub use executor::{
    classify, classify_code, CancellationToken, ExecutorStats, FailureClass,
    TransactionalExecutor, UnitOfWorkKind, UnitOfWorkSession,
};
pub use memory::{FaultPoint, InMemoryStore, StoreStats};
pub use scheduler::PeriodicRefresher;
pub use store::{SessionOptions, Store, StoreTransaction};
