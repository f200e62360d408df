//! Thin snapshot-cache configurations over single tables.

use std::collections::HashMap;
use std::sync::Arc;

use refdata_core::{EntityId, ExecutorConfig, Record, RefDataResult};

use super::policy::RefreshPolicy;
use super::snapshot::SnapshotCache;
use super::watermark::Watermark;
use crate::executor::UnitOfWorkSession;
use crate::store::Store;

/// Probe returning the latest watermark across several tables.
///
/// Used when a cache's rows are assembled from a parent table and joined
/// child tables; a change in any of them must invalidate the snapshot.
pub fn table_probe(
    tables: &[&str],
) -> impl Fn(&mut UnitOfWorkSession<'_>) -> RefDataResult<Watermark> + Send + Sync + 'static {
    let tables: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
    move |session: &mut UnitOfWorkSession<'_>| {
        let mut watermark = Watermark::Never;
        for table in &tables {
            watermark = watermark.merge(session.watermark(table)?);
        }
        Ok(watermark)
    }
}

/// Records keyed by id.
pub fn record_table(
    store: Arc<dyn Store>,
    table: &str,
    policy: RefreshPolicy,
    executor_config: ExecutorConfig,
) -> RefDataResult<SnapshotCache<EntityId, Record>> {
    let source = table.to_string();
    SnapshotCache::builder(table, store, table_probe(&[table]), move |session| {
        Ok(session
            .all(&source)?
            .into_iter()
            .map(|record| (record.id, record))
            .collect())
    })
    .policy(policy)
    .executor_config(executor_config)
    .build()
}

/// Records keyed by code. Records without a code are left out.
pub fn code_table(
    store: Arc<dyn Store>,
    table: &str,
    policy: RefreshPolicy,
    executor_config: ExecutorConfig,
) -> RefDataResult<SnapshotCache<String, Record>> {
    keyed_by_code(store, table, policy, executor_config, |code| code.to_string())
}

/// Postal-code records keyed by normalized postal code.
pub fn postal_codes(
    store: Arc<dyn Store>,
    table: &str,
    policy: RefreshPolicy,
    executor_config: ExecutorConfig,
) -> RefDataResult<SnapshotCache<String, Record>> {
    keyed_by_code(store, table, policy, executor_config, normalize_postal_code)
}

/// Uppercase with whitespace and dashes removed, so "ab1 2cd" and "AB1-2CD"
/// hit the same entry.
pub fn normalize_postal_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

fn keyed_by_code(
    store: Arc<dyn Store>,
    table: &str,
    policy: RefreshPolicy,
    executor_config: ExecutorConfig,
    key: fn(&str) -> String,
) -> RefDataResult<SnapshotCache<String, Record>> {
    let source = table.to_string();
    SnapshotCache::builder(table, store, table_probe(&[table]), move |session| {
        let mut entries = HashMap::new();
        for record in session.all(&source)? {
            if let Some(code) = record.code.as_deref() {
                entries.insert(key(code), record);
            }
        }
        Ok(entries)
    })
    .policy(policy)
    .executor_config(executor_config)
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::TransactionalExecutor;
    use chrono::{Duration, Utc};
    use refdata_core::new_entity_id;

    #[test]
    fn test_normalize_postal_code() {
        assert_eq!(normalize_postal_code("sw1a 1aa"), "SW1A1AA");
        assert_eq!(normalize_postal_code(" 01-234 "), "01234");
        assert_eq!(normalize_postal_code("8001"), "8001");
    }

    #[test]
    fn test_code_table_skips_uncoded_records() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .seed(
                "country",
                [
                    Record::new(new_entity_id(), now).with_code("CH"),
                    Record::new(new_entity_id(), now).with_code("DE"),
                    Record::new(new_entity_id(), now),
                ],
            )
            .unwrap();

        let cache = code_table(store, "country", RefreshPolicy::eager(), ExecutorConfig::default())
            .unwrap();
        let snapshot = cache.get_snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key(&"CH".to_string()));
    }

    #[test]
    fn test_postal_codes_keyed_normalized() {
        let store = Arc::new(InMemoryStore::new());
        let id = new_entity_id();
        store
            .seed("postal_code", [Record::new(id, Utc::now()).with_code("ec1a 1bb")])
            .unwrap();

        let cache = postal_codes(
            store,
            "postal_code",
            RefreshPolicy::eager(),
            ExecutorConfig::default(),
        )
        .unwrap();
        let key = normalize_postal_code("EC1A-1BB");
        assert_eq!(cache.current().get(&key).map(|r| r.id), Some(id));
    }

    #[test]
    fn test_table_probe_takes_latest_table() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let later = now + Duration::minutes(1);
        store
            .seed("locality", [Record::new(new_entity_id(), now)])
            .unwrap();
        store
            .seed("postal_code", [Record::new(new_entity_id(), later)])
            .unwrap();

        let probe = table_probe(&["locality", "postal_code", "missing"]);
        let executor = TransactionalExecutor::with_defaults(store);
        let watermark = executor.execute_isolated_read(|s| probe(s)).unwrap();
        assert_eq!(watermark, Watermark::at(later));
    }

    #[test]
    fn test_record_table_keyed_by_id() {
        let store = Arc::new(InMemoryStore::new());
        let id = new_entity_id();
        store
            .seed("unit", [Record::new(id, Utc::now()).with_code("KG")])
            .unwrap();

        let cache =
            record_table(store, "unit", RefreshPolicy::eager(), ExecutorConfig::default()).unwrap();
        assert_eq!(
            cache.current().get(&id).and_then(|r| r.code.clone()),
            Some("KG".to_string())
        );
    }
}
