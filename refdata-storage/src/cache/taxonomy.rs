//! Code-keyed taxonomies.
//!
//! A taxonomy is a small table of stable business codes ("ACTIVE", "CHF",
//! "DE") each identified by an entity id. Callers refer to codes in source
//! and compare against ids read from other records.

use std::sync::Arc;

use refdata_core::{CacheError, EntityId, ExecutorConfig, RefDataError, RefDataResult};

use super::policy::RefreshPolicy;
use super::snapshot::SnapshotCache;
use super::tables::table_probe;
use super::traits::{CacheStats, RefreshableCache};
use super::watermark::Watermark;
use crate::store::Store;

/// Marker type naming one taxonomy table.
///
/// ```
/// use refdata_storage::Taxonomy;
///
/// pub struct Currency;
///
/// impl Taxonomy for Currency {
///     const NAME: &'static str = "currency";
///     const TABLE: &'static str = "ref_currency";
/// }
/// ```
pub trait Taxonomy: Send + Sync + 'static {
    /// Name used in errors and logs
    const NAME: &'static str;
    /// Backing table
    const TABLE: &'static str;
}

/// Bidirectional code/id lookup over one taxonomy table.
#[derive(Debug)]
pub struct TaxonomyCache {
    taxonomy: &'static str,
    codes: SnapshotCache<String, EntityId>,
}

impl TaxonomyCache {
    pub fn new(
        taxonomy: &'static str,
        store: Arc<dyn Store>,
        table: &str,
        policy: RefreshPolicy,
        executor_config: ExecutorConfig,
    ) -> RefDataResult<Self> {
        let source = table.to_string();
        let codes = SnapshotCache::builder(taxonomy, store, table_probe(&[table]), move |session| {
            Ok(session
                .all(&source)?
                .into_iter()
                .filter_map(|record| record.code.map(|code| (code, record.id)))
                .collect())
        })
        .policy(policy)
        .executor_config(executor_config)
        .build()?;
        Ok(Self { taxonomy, codes })
    }

    /// Cache for a [`Taxonomy`] marker type.
    pub fn for_taxonomy<T: Taxonomy>(
        store: Arc<dyn Store>,
        policy: RefreshPolicy,
        executor_config: ExecutorConfig,
    ) -> RefDataResult<Self> {
        Self::new(T::NAME, store, T::TABLE, policy, executor_config)
    }

    pub fn taxonomy(&self) -> &'static str {
        self.taxonomy
    }

    /// Id for a code.
    pub fn get(&self, code: &str) -> RefDataResult<EntityId> {
        let snapshot = self.codes.get_snapshot()?;
        snapshot
            .get(&code.trim().to_string())
            .copied()
            .ok_or_else(|| self.not_found(code))
    }

    /// Code for an id.
    pub fn get_by_value(&self, id: EntityId) -> RefDataResult<String> {
        // Linear scan; taxonomies are small.
        let snapshot = self.codes.get_snapshot()?;
        let found = snapshot
            .iter()
            .find(|(_, value)| **value == id)
            .map(|(code, _)| code.clone());
        found.ok_or_else(|| self.not_found(&id.to_string()))
    }

    /// Whether `id` is the id of `code`. Unknown codes are an error.
    pub fn compare(&self, id: EntityId, code: &str) -> RefDataResult<bool> {
        Ok(self.get(code)? == id)
    }

    /// All codes, sorted.
    pub fn codes(&self) -> RefDataResult<Vec<String>> {
        let mut codes: Vec<String> = self.codes.get_snapshot()?.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }

    fn not_found(&self, key: &str) -> RefDataError {
        CacheError::KeyNotFound {
            taxonomy: self.taxonomy.to_string(),
            key: key.to_string(),
        }
        .into()
    }
}

impl RefreshableCache for TaxonomyCache {
    fn name(&self) -> &str {
        self.taxonomy
    }

    fn check_and_refresh(&self) -> RefDataResult<bool> {
        self.codes.check_and_refresh()
    }

    fn rebuild(&self) -> RefDataResult<()> {
        self.codes.rebuild()
    }

    fn watermark(&self) -> Watermark {
        self.codes.current().watermark()
    }

    fn stats(&self) -> CacheStats {
        self.codes.stats()
    }
}
