//! Integration tests for the cache registry.
//!
//! Exercises the registry end to end over the fixture store: typed taxonomy
//! lookups, named hierarchies, bulk refresh, background refresh and the
//! process-wide instance.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use refdata_storage::{
    global, install_global, normalize_postal_code, postal_codes, CacheRegistry, HierarchyShape,
    InMemoryStore, PeriodicRefresher, RefreshPolicy, Taxonomy,
};
use refdata_test_utils::{assertions, fixtures, init_tracing, CacheError, RefDataError};

struct Country;

impl Taxonomy for Country {
    const NAME: &'static str = "country";
    const TABLE: &'static str = fixtures::COUNTRY_TABLE;
}

struct Currency;

impl Taxonomy for Currency {
    const NAME: &'static str = "currency";
    const TABLE: &'static str = "ref_currency";
}

fn build_registry(store: &Arc<InMemoryStore>) -> CacheRegistry {
    CacheRegistry::builder(store.clone(), fixtures::test_config())
        .register::<Country>()
        .register_hierarchy(
            "industry",
            fixtures::INDUSTRY_TABLE,
            HierarchyShape::IndustrialThreeLevel,
        )
        .register_hierarchy("industry_full", fixtures::INDUSTRY_TABLE, HierarchyShape::AsStored)
        .build()
        .unwrap()
}

#[test]
fn test_registry_over_fixture_store() {
    init_tracing();
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let registry = build_registry(&store);

    let swiss = registry.get::<Country>("CH").unwrap();
    assert_eq!(registry.get_by_value::<Country>(swiss).unwrap(), "CH");
    assert!(registry.compare::<Country>(swiss, "CH").unwrap());
    assertions::assert_key_not_found(&registry.get::<Country>("ZZ"), "country");

    match registry.get::<Currency>("CHF") {
        Err(RefDataError::Cache(CacheError::NotRegistered { taxonomy })) => {
            assert_eq!(taxonomy, "currency")
        }
        other => panic!("Expected NotRegistered, got: {:?}", other),
    }

    let compressed = registry.hierarchy("industry").unwrap();
    let full = registry.hierarchy("industry_full").unwrap();
    let count = |tree: Vec<refdata_storage::TreeNode>| tree.iter().map(|t| t.size()).sum::<usize>();
    assert_eq!(count(compressed.get_tree(None).unwrap()), 8);
    assert_eq!(count(full.get_tree(None).unwrap()), 14);
}

#[test]
fn test_bulk_refresh_picks_up_changes() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let registry = build_registry(&store);
    let swiss = registry.get::<Country>("CH").unwrap();

    store
        .update(fixtures::COUNTRY_TABLE, swiss, |r| {
            r.code = Some("CHE".to_string());
            r.modified = Utc::now();
        })
        .unwrap();

    // Eager caches keep serving the old snapshot until refreshed.
    assert_eq!(registry.get::<Country>("CH").unwrap(), swiss);

    let summary = registry.check_and_refresh().unwrap();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.refreshed, 1);
    assert_eq!(registry.get::<Country>("CHE").unwrap(), swiss);

    let forced = registry.refresh().unwrap();
    assert_eq!(forced.refreshed, 3);
}

#[test]
fn test_periodic_refresher_applies_changes() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let registry = Arc::new(build_registry(&store));
    let refresher =
        PeriodicRefresher::for_registry(Arc::clone(&registry), Duration::from_millis(10)).unwrap();

    let austria = registry.get::<Country>("AT").unwrap();
    store
        .update(fixtures::COUNTRY_TABLE, austria, |r| {
            r.code = Some("AUT".to_string());
            r.modified = Utc::now();
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.get::<Country>("AUT").is_err() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(registry.get::<Country>("AUT").unwrap(), austria);
    assert!(refresher.stop() >= 1);
}

#[test]
fn test_lazy_registry_loads_on_demand() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let registry = CacheRegistry::builder(store.clone(), fixtures::test_config())
        .policy(RefreshPolicy::lazy(Duration::from_secs(60)))
        .register::<Country>()
        .build()
        .unwrap();
    assert_eq!(store.stats().full_fetches, 0);

    registry.get::<Country>("DE").unwrap();
    registry.get::<Country>("FR").unwrap();
    assert_eq!(store.stats().full_fetches, 1);
}

#[test]
fn test_postal_code_lookup() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let cache = postal_codes(
        store,
        fixtures::POSTAL_CODE_TABLE,
        RefreshPolicy::eager(),
        fixtures::fast_executor_config(),
    )
    .unwrap();

    let london = cache
        .current()
        .get(&normalize_postal_code("SW1A-1AA"))
        .and_then(|r| r.name_for("en").map(str::to_string));
    assert_eq!(london.as_deref(), Some("London"));
}

#[test]
fn test_global_registry_lifecycle() {
    assert!(matches!(
        global(),
        Err(RefDataError::Cache(CacheError::GlobalNotInstalled))
    ));

    let store = Arc::new(fixtures::seeded_store().unwrap());
    let installed = install_global(build_registry(&store)).unwrap();
    let swiss = installed.get::<Country>("CH").unwrap();
    assert_eq!(global().unwrap().get::<Country>("CH").unwrap(), swiss);

    assert!(matches!(
        install_global(build_registry(&store)),
        Err(RefDataError::Cache(CacheError::GlobalAlreadyInstalled))
    ));

    let refresher = PeriodicRefresher::for_registry(global().unwrap(), Duration::from_millis(5))
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    refresher.stop();
}
