//! REFDATA Test Utilities
//!
//! Shared test infrastructure for the REFDATA workspace:
//! - Proptest generators for records, forests and configuration
//! - Fixtures with realistic reference data (industrial classification,
//!   countries, postal codes) and a seeded in-memory store
//! - Assertions for REFDATA error variants and tree shapes
//! - Tracing initialisation for tests

pub use refdata_storage::{FaultPoint, InMemoryStore, StoreStats};

pub use refdata_core::{
    new_entity_id, AccessMode, CacheConfig, CacheError, EntityId, ExecutorConfig,
    IsolationLevel, LocalizedName, Record, RefDataConfig, RefDataError, RefDataResult,
    StoreError, StoreErrorCode, Timestamp,
};

use chrono::Utc;
use std::sync::Once;
use uuid::Uuid;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only. Output goes through the
/// test harness so it is captured per test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("refdata_storage=warn,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for REFDATA types.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::Index;

    /// Generate a random entity id.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a language tag, sometimes with a region.
    pub fn arb_language() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("en".to_string()),
            Just("de".to_string()),
            Just("fr".to_string()),
            Just("de-CH".to_string()),
            Just("it".to_string()),
        ]
    }

    /// Generate a localized name.
    pub fn arb_localized_name() -> impl Strategy<Value = LocalizedName> {
        (arb_language(), "[A-Za-z][A-Za-z ]{0,15}", arb_timestamp())
            .prop_map(|(language, name, modified)| LocalizedName::new(language, name, modified))
    }

    /// Generate a flat record with no parent.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            arb_entity_id(),
            proptest::option::of("[A-Z0-9]{1,5}"),
            arb_timestamp(),
            prop::collection::vec(arb_localized_name(), 0..3),
        )
            .prop_map(|(id, code, modified, names)| Record {
                id,
                code,
                modified,
                parent_id: None,
                names,
            })
    }

    /// Generate records forming an acyclic forest.
    ///
    /// Record `i` either is a root or points at some record before it, so
    /// parent links can never form a cycle.
    pub fn arb_forest_records(max: usize) -> impl Strategy<Value = Vec<Record>> {
        (
            any::<u64>(),
            prop::collection::vec((any::<bool>(), any::<Index>(), arb_timestamp()), 1..max.max(2)),
        )
            .prop_map(|(salt, shape)| {
                let ids: Vec<EntityId> = (0..shape.len())
                    .map(|i| Uuid::from_u128((u128::from(salt) << 64) | i as u128))
                    .collect();
                shape
                    .iter()
                    .enumerate()
                    .map(|(i, (has_parent, pick, modified))| {
                        let record = Record::new(ids[i], *modified)
                            .with_code(format!("N{i:03}"))
                            .with_name("en", format!("Node {i}"));
                        if *has_parent && i > 0 {
                            record.with_parent(ids[pick.index(i)])
                        } else {
                            record
                        }
                    })
                    .collect()
            })
    }

    /// An acyclic forest plus records that must never reach the tree:
    /// orphans pointing at missing parents and a two-node cycle.
    pub fn arb_tangled_records(max: usize) -> impl Strategy<Value = (Vec<Record>, Vec<EntityId>)> {
        (arb_forest_records(max), 0usize..4, arb_timestamp()).prop_map(
            |(mut records, orphans, modified)| {
                let mut unreachable = Vec::new();
                for _ in 0..orphans {
                    let orphan = Record::new(new_entity_id(), modified).with_parent(new_entity_id());
                    unreachable.push(orphan.id);
                    records.push(orphan);
                }

                let mut a = Record::new(new_entity_id(), modified).with_code("CYC-A");
                let b = Record::new(new_entity_id(), modified)
                    .with_code("CYC-B")
                    .with_parent(a.id);
                a.parent_id = Some(b.id);
                unreachable.extend([a.id, b.id]);
                records.extend([a, b]);

                (records, unreachable)
            },
        )
    }

    /// Generate non-decreasing second offsets for advancing a watermark.
    pub fn arb_watermark_steps(max: usize) -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(0i64..3600, 1..max.max(2)).prop_map(|mut deltas| {
            let mut acc = 0;
            for d in deltas.iter_mut() {
                acc += *d;
                *d = acc;
            }
            deltas
        })
    }

    /// Generate an IsolationLevel variant.
    pub fn arb_isolation_level() -> impl Strategy<Value = IsolationLevel> {
        prop_oneof![
            Just(IsolationLevel::ReadUncommitted),
            Just(IsolationLevel::ReadCommitted),
            Just(IsolationLevel::RepeatableRead),
            Just(IsolationLevel::Snapshot),
            Just(IsolationLevel::Serializable),
        ]
    }

    /// Generate a store error code that the executor retries.
    pub fn arb_transient_code() -> impl Strategy<Value = StoreErrorCode> {
        prop_oneof![
            Just(StoreErrorCode::Deadlock),
            Just(StoreErrorCode::SerializationFailure),
            Just(StoreErrorCode::ConcurrencyConflict),
        ]
    }

    /// Generate any StoreErrorCode variant.
    pub fn arb_store_error_code() -> impl Strategy<Value = StoreErrorCode> {
        prop_oneof![
            arb_transient_code(),
            Just(StoreErrorCode::TooManyConnections),
            Just(StoreErrorCode::OutOfMemory),
            Just(StoreErrorCode::InsufficientResources),
            Just(StoreErrorCode::DiskFull),
            Just(StoreErrorCode::Cancelled),
            Just(StoreErrorCode::Unclassified),
        ]
    }

    /// Generate a valid executor configuration with tiny delays.
    pub fn arb_executor_config() -> impl Strategy<Value = ExecutorConfig> {
        (0u32..8, 0u32..4, 0u64..3, arb_isolation_level()).prop_map(
            |(budget, resource, base_ms, read_isolation)| {
                let mut config = ExecutorConfig::default()
                    .with_retry_budget(budget)
                    .with_resource_retries(resource)
                    .with_backoff(
                        std::time::Duration::from_millis(base_ms),
                        std::time::Duration::from_millis(base_ms * 4),
                    );
                config.read_isolation = read_isolation;
                config
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Realistic reference data.

    use super::*;
    use chrono::Duration;

    pub const INDUSTRY_TABLE: &str = "ref_industry";
    pub const COUNTRY_TABLE: &str = "ref_country";
    pub const POSTAL_CODE_TABLE: &str = "ref_postal_code";

    /// A fixed point an hour in the past, so tests can move data forward.
    pub fn base_time() -> Timestamp {
        Utc::now() - Duration::hours(1)
    }

    /// Five-level industrial classification: two sections, three divisions
    /// and a full chain down to classes for each division.
    pub fn industrial_classification() -> Vec<Record> {
        let at = base_time();
        let mut records = Vec::new();

        let sections = [("A", "Agriculture, forestry and fishing"), ("C", "Manufacturing")];
        let divisions = [
            ("A", "01", "Crop and animal production"),
            ("A", "02", "Forestry and logging"),
            ("C", "10", "Manufacture of food products"),
        ];

        let mut section_ids = std::collections::HashMap::new();
        for (code, name) in sections {
            let record = Record::new(new_entity_id(), at)
                .with_code(code)
                .with_name("en", name);
            section_ids.insert(code, record.id);
            records.push(record);
        }

        for (section, code, name) in divisions {
            let division = Record::new(new_entity_id(), at)
                .with_code(code)
                .with_parent(section_ids[section])
                .with_name("en", name);
            let group = Record::new(new_entity_id(), at)
                .with_code(format!("{code}1"))
                .with_parent(division.id)
                .with_name("en", format!("{name} (group)"));
            let class = Record::new(new_entity_id(), at)
                .with_code(format!("{code}11"))
                .with_parent(group.id)
                .with_name("en", format!("{name} (class)"));
            let subclass = Record::new(new_entity_id(), at)
                .with_code(format!("{code}110"))
                .with_parent(class.id)
                .with_name("en", format!("{name} (detail)"))
                .with_name("de", format!("{code}110 Detail"));
            records.extend([division, group, class, subclass]);
        }
        records
    }

    /// Countries with English and German names.
    pub fn countries() -> Vec<Record> {
        let at = base_time();
        [
            ("CH", "Switzerland", "Schweiz"),
            ("DE", "Germany", "Deutschland"),
            ("AT", "Austria", "Österreich"),
            ("FR", "France", "Frankreich"),
        ]
        .into_iter()
        .map(|(code, en, de)| {
            Record::new(new_entity_id(), at)
                .with_code(code)
                .with_name("en", en)
                .with_name("de", de)
        })
        .collect()
    }

    /// Postal codes as stored, with inconsistent spacing and case.
    pub fn postal_codes() -> Vec<Record> {
        let at = base_time();
        [("8001", "Zürich"), ("1201", "Genève"), ("sw1a 1aa", "London"), ("75001", "Paris")]
            .into_iter()
            .map(|(code, locality)| {
                Record::new(new_entity_id(), at)
                    .with_code(code)
                    .with_name("en", locality)
            })
            .collect()
    }

    /// Store holding every fixture table.
    pub fn seeded_store() -> RefDataResult<InMemoryStore> {
        let store = InMemoryStore::new();
        store.seed(INDUSTRY_TABLE, industrial_classification())?;
        store.seed(COUNTRY_TABLE, countries())?;
        store.seed(POSTAL_CODE_TABLE, postal_codes())?;
        Ok(store)
    }

    /// Executor configuration with near-zero backoff for fast retry tests.
    pub fn fast_executor_config() -> ExecutorConfig {
        ExecutorConfig::default().with_backoff(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(2),
        )
    }

    /// Full configuration using [`fast_executor_config`].
    pub fn test_config() -> RefDataConfig {
        RefDataConfig {
            executor: fast_executor_config(),
            ..RefDataConfig::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for REFDATA-specific validation.

    use super::*;
    use refdata_storage::TreeNode;
    use std::collections::HashSet;

    /// Assert that a result is a classified transient store error.
    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &RefDataResult<T>, attempts: u32) {
        match result {
            Err(RefDataError::Store(StoreError::Transient { attempts: a, .. })) => {
                assert_eq!(*a, attempts, "Wrong attempt count in Transient error");
            }
            other => panic!("Expected Transient after {} attempts, got: {:?}", attempts, other),
        }
    }

    /// Assert that a result is a cancellation.
    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(result: &RefDataResult<T>) {
        match result {
            Err(RefDataError::Store(StoreError::Cancelled)) => {}
            other => panic!("Expected Cancelled, got: {:?}", other),
        }
    }

    /// Assert that a result is a single-flight rejection.
    #[track_caller]
    pub fn assert_already_in_use<T: std::fmt::Debug>(result: &RefDataResult<T>) {
        match result {
            Err(RefDataError::Store(StoreError::AlreadyInUse)) => {}
            other => panic!("Expected AlreadyInUse, got: {:?}", other),
        }
    }

    /// Assert that a result is a missing taxonomy key.
    #[track_caller]
    pub fn assert_key_not_found<T: std::fmt::Debug>(result: &RefDataResult<T>, taxonomy: &str) {
        match result {
            Err(RefDataError::Cache(CacheError::KeyNotFound { taxonomy: t, .. })) => {
                assert_eq!(t, taxonomy, "Wrong taxonomy in KeyNotFound error");
            }
            other => panic!("Expected KeyNotFound for {}, got: {:?}", taxonomy, other),
        }
    }

    /// Assert that trees form a forest: every child points at the node it
    /// hangs under, depths increase by one, and no id appears twice.
    #[track_caller]
    pub fn assert_valid_forest(roots: &[TreeNode]) {
        let mut seen = HashSet::new();
        let mut stack: Vec<(&TreeNode, Option<EntityId>, usize)> =
            roots.iter().map(|r| (r, None, 1)).collect();

        while let Some((node, parent, depth)) = stack.pop() {
            assert!(
                seen.insert(node.record.id),
                "Node {} appears more than once",
                node.record.id
            );
            assert_eq!(node.record.parent_id, parent, "Node {} under wrong parent", node.record.id);
            assert_eq!(node.depth, depth, "Node {} at wrong depth", node.record.id);
            for child in &node.children {
                stack.push((child, Some(node.record.id), depth + 1));
            }
        }
    }
}
