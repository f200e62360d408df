//! Property-Based Tests for Snapshot Cache Consistency
//!
//! **Property 1: Atomic Swap**
//! Readers running during a reload see either the old snapshot or the new
//! one, never a mixture.
//!
//! **Property 2: Monotone Watermark**
//! The recorded watermark never decreases across loads, whatever the store
//! reports.
//!
//! **Property 3: Probe-Only Refresh**
//! While the store watermark is unchanged, `load()` performs no full fetch.
//!
//! **Property 4: Child Collection Freshness**
//! Editing only a localized name makes `needs_refresh()` true.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use refdata_storage::{
    record_table, InMemoryStore, RefreshPolicy, SnapshotCache, Watermark,
};
use refdata_test_utils::{fixtures, generators, init_tracing, new_entity_id, EntityId, Record};

const TABLE: &str = "ref_unit";

// ============================================================================
// HELPERS
// ============================================================================

fn generation(ids: &[EntityId], gen: i64) -> Vec<Record> {
    let at = fixtures::base_time() + ChronoDuration::seconds(gen);
    ids.iter()
        .map(|id| Record::new(*id, at).with_code(format!("G{gen}")))
        .collect()
}

fn unit_cache(store: &Arc<InMemoryStore>) -> SnapshotCache<EntityId, Record> {
    record_table(
        store.clone(),
        TABLE,
        RefreshPolicy::eager(),
        fixtures::fast_executor_config(),
    )
    .unwrap()
}

// ============================================================================
// PROPERTY 1: ATOMIC SWAP
// ============================================================================

#[test]
fn test_concurrent_readers_never_see_partial_snapshot() {
    init_tracing();
    let ids: Vec<EntityId> = (0..50).map(|_| new_entity_id()).collect();
    let store = Arc::new(InMemoryStore::new());
    store.seed(TABLE, generation(&ids, 0)).unwrap();
    store.set_fetch_delay(Duration::from_millis(2));

    let cache = Arc::new(unit_cache(&store));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !done.load(Ordering::SeqCst) {
                    let snapshot = cache.get_snapshot().unwrap();
                    let mut codes = snapshot.values().map(|r| r.code.clone());
                    let first = codes.next().flatten();
                    assert!(codes.all(|c| c == first), "mixed generations in one snapshot");
                    assert_eq!(snapshot.len(), 50);
                    observed = observed.max(snapshot.version());
                }
                observed
            })
        })
        .collect();

    for gen in 1..=10 {
        store.seed(TABLE, generation(&ids, gen)).unwrap();
        assert!(cache.load().unwrap());
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        let observed = reader.join().unwrap();
        assert!(observed <= 11);
    }
    let last = cache.current();
    assert_eq!(last.version(), 11);
    assert!(last.values().all(|r| r.code.as_deref() == Some("G10")));
}

#[test]
fn test_concurrent_loaders_coalesce() {
    let ids: Vec<EntityId> = (0..10).map(|_| new_entity_id()).collect();
    let store = Arc::new(InMemoryStore::new());
    store.seed(TABLE, generation(&ids, 0)).unwrap();
    let cache = Arc::new(unit_cache(&store));

    store.seed(TABLE, generation(&ids, 1)).unwrap();
    store.set_fetch_delay(Duration::from_millis(20));
    let before = store.stats().full_fetches;

    let loaders: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.load().unwrap())
        })
        .collect();
    let swapped = loaders
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|s| *s)
        .count();

    assert_eq!(swapped, 1);
    assert_eq!(store.stats().full_fetches - before, 1);
    assert_eq!(cache.current().version(), 2);
}

// ============================================================================
// PROPERTY 2: MONOTONE WATERMARK
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_watermark_never_decreases(
        offsets in prop::collection::vec(-3600i64..3600, 1..12)
    ) {
        let id = new_entity_id();
        let store = Arc::new(InMemoryStore::new());
        store.seed(TABLE, [Record::new(id, fixtures::base_time())]).unwrap();
        let cache = unit_cache(&store);

        let mut previous = cache.current().watermark();
        for offset in offsets {
            store
                .update(TABLE, id, |r| r.modified = fixtures::base_time() + ChronoDuration::seconds(offset))
                .unwrap();
            cache.rebuild().unwrap();
            let current = cache.current().watermark();
            prop_assert!(current.is_at_least(&previous));
            previous = current;
        }
    }

    #[test]
    fn prop_watermark_tracks_forward_writes(steps in generators::arb_watermark_steps(10)) {
        let id = new_entity_id();
        let store = Arc::new(InMemoryStore::new());
        store.seed(TABLE, [Record::new(id, fixtures::base_time())]).unwrap();
        let cache = unit_cache(&store);

        for step in steps {
            let at = fixtures::base_time() + ChronoDuration::seconds(step);
            store.update(TABLE, id, |r| r.modified = at).unwrap();
            cache.load().unwrap();
            prop_assert_eq!(cache.current().watermark(), Watermark::at(at));
        }
    }
}

// ============================================================================
// PROPERTY 3: PROBE-ONLY REFRESH
// ============================================================================

#[test]
fn test_unchanged_watermark_skips_full_fetch() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let cache = record_table(
        store.clone(),
        fixtures::COUNTRY_TABLE,
        RefreshPolicy::eager(),
        fixtures::fast_executor_config(),
    )
    .unwrap();
    let fetches = store.stats().full_fetches;

    for _ in 0..20 {
        assert!(!cache.load().unwrap());
        assert!(!cache.check_and_refresh().unwrap());
    }

    assert_eq!(store.stats().full_fetches, fetches);
    assert!(cache.stats().probes >= 40);
}

// ============================================================================
// PROPERTY 4: CHILD COLLECTION FRESHNESS
// ============================================================================

#[test]
fn test_name_only_edit_needs_refresh() {
    let store = Arc::new(fixtures::seeded_store().unwrap());
    let cache = record_table(
        store.clone(),
        fixtures::COUNTRY_TABLE,
        RefreshPolicy::eager(),
        fixtures::fast_executor_config(),
    )
    .unwrap();
    assert!(!cache.needs_refresh().unwrap());

    let (id, row_modified) = cache
        .current()
        .values()
        .find(|r| r.code.as_deref() == Some("CH"))
        .map(|r| (r.id, r.modified))
        .unwrap();

    store
        .update(fixtures::COUNTRY_TABLE, id, |r| {
            let name = r.names.iter_mut().find(|n| n.language == "de").unwrap();
            name.name = "Schwiiz".to_string();
            name.modified = row_modified + ChronoDuration::seconds(10);
        })
        .unwrap();

    // The parent row itself is untouched.
    assert_eq!(store.get(fixtures::COUNTRY_TABLE, id).unwrap().unwrap().modified, row_modified);
    assert!(cache.needs_refresh().unwrap());
    assert!(cache.load().unwrap());
    assert_eq!(
        cache.current().get(&id).and_then(|r| r.name_for("de").map(str::to_string)),
        Some("Schwiiz".to_string())
    );
}
