//! Cache registry.
//!
//! One place that owns every reference-data cache of a process. Taxonomies
//! are looked up by marker type, hierarchies by name. The registry is
//! assembled from an explicit registration table of constructor closures,
//! built once, and optionally installed as the process-wide instance.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use refdata_core::{CacheError, EntityId, RefDataConfig, RefDataError, RefDataResult};
use serde::Serialize;
use tracing::{info, warn};

use super::hierarchy::{HierarchicalCache, HierarchyOptions, HierarchyShape};
use super::policy::RefreshPolicy;
use super::taxonomy::{Taxonomy, TaxonomyCache};
use super::traits::{CacheStats, RefreshableCache};
use crate::store::Store;

type TaxonomyConstructor =
    Box<dyn FnOnce(Arc<dyn Store>, &RefDataConfig) -> RefDataResult<TaxonomyCache> + Send>;
type HierarchyConstructor =
    Box<dyn FnOnce(Arc<dyn Store>, &RefDataConfig) -> RefDataResult<HierarchicalCache> + Send>;

struct TaxonomyRegistration {
    type_id: TypeId,
    name: &'static str,
    construct: TaxonomyConstructor,
}

struct HierarchyRegistration {
    name: String,
    construct: HierarchyConstructor,
}

/// Identity of a registration. Two hierarchies may share a table, so the
/// cache's own name is not a key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RegistrationKey {
    Taxonomy(TypeId),
    Hierarchy(String),
}

/// A registered cache in refresh order, labelled by its registration name.
struct Registered {
    key: RegistrationKey,
    label: String,
    cache: Arc<dyn RefreshableCache>,
}

/// Registration table for a [`CacheRegistry`].
pub struct RegistryBuilder {
    store: Arc<dyn Store>,
    config: RefDataConfig,
    policy: RefreshPolicy,
    taxonomies: Vec<TaxonomyRegistration>,
    hierarchies: Vec<HierarchyRegistration>,
}

impl RegistryBuilder {
    pub fn new(store: Arc<dyn Store>, config: RefDataConfig) -> Self {
        Self {
            store,
            config,
            policy: RefreshPolicy::Eager,
            taxonomies: Vec::new(),
            hierarchies: Vec::new(),
        }
    }

    /// Policy for registrations that follow.
    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a taxonomy with the current policy.
    pub fn register<T: Taxonomy>(self) -> Self {
        let policy = self.policy;
        self.register_with::<T>(policy)
    }

    pub fn register_with<T: Taxonomy>(mut self, policy: RefreshPolicy) -> Self {
        self.taxonomies.push(TaxonomyRegistration {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            construct: Box::new(move |store: Arc<dyn Store>, config: &RefDataConfig| {
                TaxonomyCache::for_taxonomy::<T>(store, policy, config.executor.clone())
            }),
        });
        self
    }

    /// Register a named hierarchy over `table`.
    pub fn register_hierarchy(
        mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        shape: HierarchyShape,
    ) -> Self {
        let policy = self.policy;
        let table = table.into();
        self.hierarchies.push(HierarchyRegistration {
            name: name.into(),
            construct: Box::new(move |store: Arc<dyn Store>, config: &RefDataConfig| {
                let options = HierarchyOptions::from_config(config)
                    .with_shape(shape)
                    .with_policy(policy);
                HierarchicalCache::new(store, &table, options)
            }),
        });
        self
    }

    /// Run every constructor. Eager caches load here.
    pub fn build(self) -> RefDataResult<CacheRegistry> {
        self.config.validate()?;
        let started = Instant::now();

        let mut taxonomies = HashMap::new();
        let mut hierarchies = BTreeMap::new();
        let mut refresh_order: Vec<Registered> = Vec::new();

        for registration in self.taxonomies {
            let cache = Arc::new((registration.construct)(Arc::clone(&self.store), &self.config)?);
            if taxonomies
                .insert(registration.type_id, Arc::clone(&cache))
                .is_some()
            {
                warn!(taxonomy = registration.name, "Taxonomy registered twice, keeping the last");
            }
            let key = RegistrationKey::Taxonomy(registration.type_id);
            refresh_order.retain(|r| r.key != key);
            refresh_order.push(Registered {
                key,
                label: registration.name.to_string(),
                cache,
            });
        }

        for registration in self.hierarchies {
            let cache = Arc::new((registration.construct)(Arc::clone(&self.store), &self.config)?);
            if hierarchies
                .insert(registration.name.clone(), Arc::clone(&cache))
                .is_some()
            {
                warn!(hierarchy = %registration.name, "Hierarchy registered twice, keeping the last");
            }
            let key = RegistrationKey::Hierarchy(registration.name.clone());
            refresh_order.retain(|r| r.key != key);
            refresh_order.push(Registered {
                key,
                label: registration.name,
                cache,
            });
        }

        info!(
            taxonomies = taxonomies.len(),
            hierarchies = hierarchies.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache registry built"
        );

        Ok(CacheRegistry {
            taxonomies,
            hierarchies,
            refresh_order,
        })
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("policy", &self.policy)
            .field(
                "taxonomies",
                &self.taxonomies.iter().map(|t| t.name).collect::<Vec<_>>(),
            )
            .field(
                "hierarchies",
                &self.hierarchies.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Outcome of a bulk refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Typed access to every registered cache.
pub struct CacheRegistry {
    taxonomies: HashMap<TypeId, Arc<TaxonomyCache>>,
    hierarchies: BTreeMap<String, Arc<HierarchicalCache>>,
    refresh_order: Vec<Registered>,
}

impl CacheRegistry {
    pub fn builder(store: Arc<dyn Store>, config: RefDataConfig) -> RegistryBuilder {
        RegistryBuilder::new(store, config)
    }

    /// Id of `code` in taxonomy `T`.
    pub fn get<T: Taxonomy>(&self, code: &str) -> RefDataResult<EntityId> {
        self.taxonomy::<T>()?.get(code)
    }

    /// Code of `id` in taxonomy `T`.
    pub fn get_by_value<T: Taxonomy>(&self, id: EntityId) -> RefDataResult<String> {
        self.taxonomy::<T>()?.get_by_value(id)
    }

    /// Whether `id` is the id of `code` in taxonomy `T`.
    pub fn compare<T: Taxonomy>(&self, id: EntityId, code: &str) -> RefDataResult<bool> {
        self.taxonomy::<T>()?.compare(id, code)
    }

    pub fn taxonomy<T: Taxonomy>(&self) -> RefDataResult<Arc<TaxonomyCache>> {
        self.taxonomies
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| not_registered(T::NAME))
    }

    pub fn hierarchy(&self, name: &str) -> RefDataResult<Arc<HierarchicalCache>> {
        self.hierarchies
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(name))
    }

    pub fn hierarchy_names(&self) -> impl Iterator<Item = &str> {
        self.hierarchies.keys().map(String::as_str)
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.refresh_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refresh_order.is_empty()
    }

    /// Rebuild every cache unconditionally.
    pub fn refresh(&self) -> RefDataResult<RefreshSummary> {
        self.for_each_cache("refresh", |cache| cache.rebuild().map(|()| true))
    }

    /// Reload only caches whose store watermark moved.
    pub fn check_and_refresh(&self) -> RefDataResult<RefreshSummary> {
        self.for_each_cache("check_and_refresh", |cache| cache.check_and_refresh())
    }

    /// Per-cache statistics in registration order, keyed by registration name.
    pub fn stats(&self) -> Vec<(String, CacheStats)> {
        self.refresh_order
            .iter()
            .map(|r| (r.label.clone(), r.cache.stats()))
            .collect()
    }

    /// Every cache is attempted; the first failure is returned afterwards.
    fn for_each_cache<F>(&self, operation: &str, mut run: F) -> RefDataResult<RefreshSummary>
    where
        F: FnMut(&dyn RefreshableCache) -> RefDataResult<bool>,
    {
        let started = Instant::now();
        let mut summary = RefreshSummary::default();
        let mut first_error: Option<RefDataError> = None;

        for registered in &self.refresh_order {
            summary.checked += 1;
            match run(registered.cache.as_ref()) {
                Ok(true) => summary.refreshed += 1,
                Ok(false) => {}
                Err(err) => {
                    summary.failed += 1;
                    warn!(cache = %registered.label, operation, error = %err, "Cache refresh failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!(
            operation,
            checked = summary.checked,
            refreshed = summary.refreshed,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Registry refresh finished"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

impl AsRef<CacheRegistry> for CacheRegistry {
    fn as_ref(&self) -> &CacheRegistry {
        self
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field(
                "caches",
                &self.refresh_order.iter().map(|r| r.label.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn not_registered(taxonomy: &str) -> RefDataError {
    CacheError::NotRegistered {
        taxonomy: taxonomy.to_string(),
    }
    .into()
}

// ============================================================================
// PROCESS-WIDE INSTANCE
// ============================================================================

static GLOBAL: OnceCell<CacheRegistry> = OnceCell::new();

/// Install the process-wide registry. Fails if one is already installed.
pub fn install_global(registry: CacheRegistry) -> RefDataResult<&'static CacheRegistry> {
    GLOBAL
        .set(registry)
        .map_err(|_| CacheError::GlobalAlreadyInstalled)?;
    global()
}

/// The process-wide registry.
pub fn global() -> RefDataResult<&'static CacheRegistry> {
    GLOBAL
        .get()
        .ok_or_else(|| CacheError::GlobalNotInstalled.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultPoint, InMemoryStore};
    use chrono::{Duration, Utc};
    use refdata_core::{new_entity_id, Record, StoreErrorCode};

    struct Country;
    impl Taxonomy for Country {
        const NAME: &'static str = "country";
        const TABLE: &'static str = "ref_country";
    }

    struct Currency;
    impl Taxonomy for Currency {
        const NAME: &'static str = "currency";
        const TABLE: &'static str = "ref_currency";
    }

    struct Language;
    impl Taxonomy for Language {
        const NAME: &'static str = "language";
        const TABLE: &'static str = "ref_language";
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        swiss: EntityId,
        franc: Record,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let past = Utc::now() - Duration::hours(2);
        let swiss = new_entity_id();
        let franc = Record::new(new_entity_id(), past).with_code("CHF");
        store
            .seed(
                Country::TABLE,
                [
                    Record::new(swiss, past).with_code("CH"),
                    Record::new(new_entity_id(), past).with_code("AT"),
                ],
            )
            .unwrap();
        store.seed(Currency::TABLE, [franc.clone()]).unwrap();
        store
            .seed(
                "region",
                [Record::new(new_entity_id(), past)
                    .with_code("EU")
                    .with_name("en", "Europe")],
            )
            .unwrap();
        Fixture {
            store,
            swiss,
            franc,
        }
    }

    fn registry(f: &Fixture) -> CacheRegistry {
        CacheRegistry::builder(f.store.clone(), RefDataConfig::default())
            .register::<Country>()
            .register::<Currency>()
            .register_hierarchy("regions", "region", HierarchyShape::AsStored)
            .build()
            .unwrap()
    }

    #[test]
    fn test_typed_lookups() {
        let f = fixture();
        let registry = registry(&f);

        assert_eq!(registry.get::<Country>("CH").unwrap(), f.swiss);
        assert_eq!(registry.get_by_value::<Country>(f.swiss).unwrap(), "CH");
        assert!(registry.compare::<Country>(f.swiss, "CH").unwrap());
        assert!(!registry.compare::<Country>(f.swiss, "AT").unwrap());
        assert_eq!(registry.get::<Currency>("CHF").unwrap(), f.franc.id);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_missing_key_and_unregistered_taxonomy() {
        let f = fixture();
        let registry = registry(&f);

        let missing = registry.get::<Country>("XX").unwrap_err();
        assert!(missing.is_not_found());

        let unregistered = registry.get::<Language>("en").unwrap_err();
        assert_eq!(
            unregistered,
            RefDataError::from(CacheError::NotRegistered {
                taxonomy: "language".to_string()
            })
        );
        assert!(registry.hierarchy("nope").is_err());
    }

    #[test]
    fn test_hierarchy_lookup() {
        let f = fixture();
        let registry = registry(&f);
        let regions = registry.hierarchy("regions").unwrap();
        assert_eq!(regions.get_top_level().unwrap().len(), 1);
        assert_eq!(registry.hierarchy_names().collect::<Vec<_>>(), vec!["regions"]);
    }

    #[test]
    fn test_check_and_refresh_only_reloads_stale() {
        let f = fixture();
        let registry = registry(&f);

        let idle = registry.check_and_refresh().unwrap();
        assert_eq!(idle.checked, 3);
        assert_eq!(idle.refreshed, 0);

        f.store
            .update(Currency::TABLE, f.franc.id, |r| {
                r.code = Some("CHW".to_string());
                r.modified = Utc::now();
            })
            .unwrap();

        let summary = registry.check_and_refresh().unwrap();
        assert_eq!(summary.refreshed, 1);
        assert_eq!(registry.get::<Currency>("CHW").unwrap(), f.franc.id);
    }

    #[test]
    fn test_refresh_rebuilds_everything() {
        let f = fixture();
        let registry = registry(&f);
        let summary = registry.refresh().unwrap();
        assert_eq!(summary.refreshed, 3);
        assert!(registry.stats().iter().all(|(_, s)| s.version == 2));
    }

    #[test]
    fn test_refresh_continues_past_failure() {
        let f = fixture();
        let registry = registry(&f);
        f.store
            .inject_failures(FaultPoint::Fetch, StoreErrorCode::DiskFull, 1);

        assert!(registry.refresh().is_err());
        // The first cache failed, the others were still rebuilt.
        let versions: Vec<u64> = registry.stats().iter().map(|(_, s)| s.version).collect();
        assert_eq!(versions, vec![1, 2, 2]);
    }

    #[test]
    fn test_duplicate_hierarchy_replaces_by_registration_name() {
        let f = fixture();
        let past = Utc::now() - Duration::hours(2);
        f.store
            .seed(
                "region_v2",
                [
                    Record::new(new_entity_id(), past).with_code("EU"),
                    Record::new(new_entity_id(), past).with_code("AS"),
                ],
            )
            .unwrap();

        let registry = CacheRegistry::builder(f.store.clone(), RefDataConfig::default())
            .register::<Country>()
            .register_hierarchy("regions", "region", HierarchyShape::AsStored)
            .register_hierarchy("regions", "region_v2", HierarchyShape::AsStored)
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        let stats = registry.stats();
        let names: Vec<&str> = stats.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["country", "regions"]);
        assert_eq!(stats[1].1.entry_count, 2);
        assert_eq!(registry.hierarchy("regions").unwrap().get_top_level().unwrap().len(), 2);
        assert_eq!(registry.refresh().unwrap().checked, 2);
    }

    #[test]
    fn test_hierarchies_sharing_a_table_are_both_kept() {
        let f = fixture();
        let registry = CacheRegistry::builder(f.store.clone(), RefDataConfig::default())
            .register_hierarchy("regions", "region", HierarchyShape::AsStored)
            .register_hierarchy("regions_by_code", "region", HierarchyShape::AsStored)
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.check_and_refresh().unwrap().checked, 2);
    }

    #[test]
    fn test_lazy_registration_defers_loading() {
        let f = fixture();
        let registry = CacheRegistry::builder(f.store.clone(), RefDataConfig::default())
            .policy(RefreshPolicy::lazy(std::time::Duration::from_secs(60)))
            .register::<Country>()
            .build()
            .unwrap();
        assert_eq!(f.store.stats().full_fetches, 0);
        assert_eq!(registry.get::<Country>("CH").unwrap(), f.swiss);
        assert_eq!(f.store.stats().full_fetches, 1);
    }

    #[test]
    fn test_global_install_once() {
        assert!(global().is_err());

        let f = fixture();
        let installed = install_global(registry(&f)).unwrap();
        assert_eq!(installed.get::<Country>("CH").unwrap(), f.swiss);
        assert!(global().is_ok());

        let again = install_global(registry(&f)).unwrap_err();
        assert_eq!(again, RefDataError::from(CacheError::GlobalAlreadyInstalled));
    }
}
