//! Snapshot caches over reference data.
//!
//! Every cache here is a read cache over data mutated elsewhere. Readers get
//! an immutable, versioned [`Snapshot`] and never block on a reload; reloads
//! are triggered by a cheap watermark probe and serialized per cache.
//!
//! # Layers
//!
//! - [`SnapshotCache`] is the one generic engine (probe, load, swap).
//! - [`tables`] holds thin configurations of it (by id, by code, postal codes).
//! - [`HierarchicalCache`] derives a forest and a name index per snapshot.
//! - [`TaxonomyCache`] maps codes to ids for one taxonomy.
//! - [`CacheRegistry`] owns them all and refreshes them in bulk.
//!
//! # Example
//!
//! ```ignore
//! let registry = CacheRegistry::builder(store, RefDataConfig::from_env())
//!     .register::<Country>()
//!     .register_hierarchy("nace", "ref_nace", HierarchyShape::IndustrialThreeLevel)
//!     .build()?;
//!
//! let swiss = registry.get::<Country>("CH")?;
//! let sectors = registry.hierarchy("nace")?.get_top_level()?;
//! ```

pub mod hierarchy;
pub mod industry;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod tables;
pub mod taxonomy;
pub mod traits;
pub mod watermark;

pub use hierarchy::{
    Forest, HierarchicalCache, Hierarchy, HierarchyNode, HierarchyOptions, HierarchyShape,
    TreeNode,
};
pub use industry::compress_to_three_levels;
pub use policy::RefreshPolicy;
pub use registry::{global, install_global, CacheRegistry, RefreshSummary, RegistryBuilder};
pub use snapshot::{LoadFn, ProbeFn, Snapshot, SnapshotCache, SnapshotCacheBuilder};
pub use tables::{code_table, normalize_postal_code, postal_codes, record_table, table_probe};
pub use taxonomy::{Taxonomy, TaxonomyCache};
pub use traits::{CacheStats, RefreshableCache};
pub use watermark::Watermark;
