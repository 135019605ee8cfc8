//! Runs against a real PostgreSQL when `DATABASE_URL` is set (a `.env` file works too);
//! otherwise every test returns early.
//!
//! Each test works in its own uniquely named tables and migration lock, so the
//! suite can share a database with other runs.

use generic_rw_postgres::domain::{Migration, MigrationSet};
use generic_rw_postgres::storage::{ClassifyError, DocumentStore, MigrationStore, StorageErrorKind};
use generic_rw_postgres::{
    hash_document, Document, MappingRegistry, PgStore, RequestContext, RwService, SchemaMigrator,
    SchemaState, TableMapping,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

async fn store() -> Option<PgStore> {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(
        PgStore::connect(&url, 5, Duration::from_secs(5))
            .await
            .expect("DATABASE_URL is set but the database is unreachable"),
    )
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

async fn create_table(store: &PgStore, table: &str) {
    sqlx::query(&format!(
        "CREATE TABLE {} (
            id VARCHAR(64) PRIMARY KEY,
            body TEXT NOT NULL,
            last_modified TIMESTAMPTZ,
            hash VARCHAR(56) NOT NULL
        )",
        table
    ))
    .execute(store.pool())
    .await
    .unwrap();
}

async fn drop_table(store: &PgStore, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
        .execute(store.pool())
        .await
        .unwrap();
}

fn mapping(table: &str, conflict_detection: bool) -> TableMapping {
    TableMapping::builder(table, "id")
        .column("id", ":id")
        .column("body", "$")
        .column("last_modified", "@._timestamp")
        .cast("last_modified", "timestamptz")
        .expose_as_header("last_modified", "Last-Modified")
        .conflict_detection(conflict_detection)
        .build()
        .unwrap()
}

fn params(key: &str) -> HashMap<String, String> {
    HashMap::from([("id".to_string(), key.to_string())])
}

fn doc(body: &str) -> Document {
    let mut doc = Document::new(body);
    doc.set_metadata("_timestamp", "2024-01-02T03:04:05.000Z");
    doc
}

#[tokio::test]
async fn hash_gated_writes_round_trip() {
    let Some(store) = store().await else { return };
    let table = unique("docs");
    create_table(&store, &table).await;

    let service = RwService::new(
        store.clone(),
        MappingRegistry::new([mapping(&table, true)]).unwrap(),
        SchemaState::Matched { version: 0 },
    );
    let ctx = RequestContext::new("tid_pg");

    let first = service
        .write(&ctx, &table, "k1", doc(r#"{"a":1}"#), &params("k1"), "")
        .await
        .unwrap();
    let second = service
        .write(&ctx, &table, "k1", doc(r#"{"a":2}"#), &params("k1"), &first.hash)
        .await
        .unwrap();
    let stale = service
        .write(&ctx, &table, "k1", doc(r#"{"a":3}"#), &params("k1"), &first.hash)
        .await
        .unwrap();
    let read = service.read(&ctx, &table, "k1").await.unwrap();
    let missing = service.read(&ctx, &table, "nope").await.unwrap_err();

    drop_table(&store, &table).await;

    assert!(first.created);
    assert!(!second.created);
    assert!(!stale.created);
    assert_eq!(read.body, br#"{"a":3}"#.to_vec());
    assert_eq!(read.hash, hash_document(br#"{"a":3}"#));
    assert!(read.metadata.contains_key("Last-Modified"));
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn upsert_distinguishes_insert_from_update() {
    let Some(store) = store().await else { return };
    let table = unique("docs");
    create_table(&store, &table).await;

    let service = RwService::new(
        store.clone(),
        MappingRegistry::new([mapping(&table, false)]).unwrap(),
        SchemaState::Matched { version: 0 },
    );
    let ctx = RequestContext::new("tid_pg_upsert");

    let first = service
        .write(&ctx, &table, "k1", doc("{}"), &params("k1"), "")
        .await
        .unwrap();
    let second = service
        .write(&ctx, &table, "k1", doc("{}"), &params("k1"), "")
        .await
        .unwrap();

    drop_table(&store, &table).await;

    assert!(first.created);
    assert!(!second.created);
}

#[tokio::test]
async fn duplicate_insert_classifies_as_unique_violation() {
    let Some(store) = store().await else { return };
    let table = unique("docs");
    create_table(&store, &table).await;
    let mapping = mapping(&table, true);
    let values = generic_rw_postgres::domain::extract::extract_column_values(
        &mapping,
        "k1",
        &Document::with_hash("{}", hash_document(b"{}")),
        &params("k1"),
        &RequestContext::default(),
    )
    .unwrap();

    store.insert(&mapping, &values).await.unwrap();
    let err = store.insert(&mapping, &values).await.unwrap_err();

    drop_table(&store, &table).await;

    assert_eq!(err.kind(), StorageErrorKind::UniqueViolation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_writes_create_once() {
    let Some(store) = store().await else { return };
    let table = unique("docs");
    create_table(&store, &table).await;

    let service = Arc::new(RwService::new(
        store.clone(),
        MappingRegistry::new([mapping(&table, true)]).unwrap(),
        SchemaState::Matched { version: 0 },
    ));

    let mut handles = Vec::new();
    for writer in 0..4 {
        let service = Arc::clone(&service);
        let table = table.clone();
        handles.push(tokio::spawn(async move {
            service
                .write(
                    &RequestContext::new(format!("tid_{}", writer)),
                    &table,
                    "k1",
                    doc(&format!(r#"{{"writer":{}}}"#, writer)),
                    &params("k1"),
                    "",
                )
                .await
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().created {
            created += 1;
        }
    }
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap();

    drop_table(&store, &table).await;

    assert_eq!(created, 1);
    assert_eq!(count, 1);
}

#[tokio::test]
async fn migrations_apply_under_advisory_lock() {
    let Some(store) = store().await else { return };
    let base = store.current_version().await.unwrap();
    let table = unique("migrated");
    let lock_name = unique("lock");
    let ordinal = base + 1;
    let mut all: Vec<Migration> = (1..=base)
        .map(|o| Migration::new(o, format!("existing-{}", o), "SELECT 1", "SELECT 1"))
        .collect();
    all.push(Migration::new(
        ordinal,
        "test-table",
        format!("CREATE TABLE {} (id TEXT PRIMARY KEY)", table),
        format!("DROP TABLE {}", table),
    ));
    let migrator = SchemaMigrator::new(MigrationSet::new(all).unwrap())
        .with_lock_name(lock_name.clone());

    let pending = migrator.check(&store, false).await;
    let migrated = migrator.check(&store, true).await;
    let lock = store.try_lock(&lock_name, Duration::from_secs(1)).await.unwrap();
    let relocked = lock.is_some();
    if let Some(lock) = lock {
        store.unlock(lock).await.unwrap();
    }
    let reverted = migrator.revert_to(&store, base).await;

    assert_eq!(
        pending,
        SchemaState::MismatchPending {
            current: base,
            required: ordinal
        }
    );
    assert_eq!(
        migrated,
        SchemaState::Migrated {
            from: base,
            version: ordinal
        }
    );
    assert!(relocked, "migration lock was not released");
    assert_eq!(reverted.unwrap(), base);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_pool_queues_within_deadline() {
    dotenv::dotenv().ok();
    let Ok(url) = std::env::var("DATABASE_URL") else { return };
    let deadline = Duration::from_secs(3);
    let store = PgStore::connect(&url, 1, deadline).await.unwrap();
    let table = unique("queued");
    create_table(&store, &table).await;

    let service = RwService::new(
        store.clone(),
        MappingRegistry::new([mapping(&table, true)]).unwrap(),
        SchemaState::Matched { version: 0 },
    );
    let held = store.pool().acquire().await.unwrap();
    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        drop(held);
    });

    let queued = service
        .write(
            &RequestContext::new("tid_queued").with_timeout(deadline),
            &table,
            "k1",
            doc("{}"),
            &params("k1"),
            "",
        )
        .await;
    holder.await.unwrap();

    let held = store.pool().acquire().await.unwrap();
    let starved = service
        .write(
            &RequestContext::new("tid_starved").with_timeout(Duration::from_millis(200)),
            &table,
            "k2",
            doc("{}"),
            &params("k2"),
            "",
        )
        .await;
    drop(held);

    drop_table(&store, &table).await;

    assert!(queued.unwrap().created);
    assert!(starved.unwrap_err().is_timeout());
}
