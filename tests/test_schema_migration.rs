//! Schema gate: version checks, forward migration under the lock, and failures.

mod common;

use common::memory_service;
use generic_rw_postgres::app::migrations;
use generic_rw_postgres::app::migrator::DEFAULT_LOCK_NAME;
use generic_rw_postgres::domain::{Migration, MigrationError, MigrationSet};
use generic_rw_postgres::{MappingRegistry, MemoryStore, RwError, RwService, SchemaMigrator, SchemaState};

fn migrator() -> SchemaMigrator {
    SchemaMigrator::new(migrations::registered().unwrap())
}

#[tokio::test]
async fn migration_required_without_migrate_flag() {
    let store = MemoryStore::new();

    let state = migrator().check(&store, false).await;

    assert_eq!(
        state,
        SchemaState::MismatchPending {
            current: 0,
            required: 3
        }
    );
    assert!(!state.is_ready());
    assert!(store.executed_statements().is_empty());

    let service = RwService::new(store, MappingRegistry::default(), state);
    let err = service.schema_check().unwrap_err();
    assert_eq!(err.to_string(), "migrating database from 0 to 3 is required");
}

#[tokio::test]
async fn migrating_brings_schema_to_required_version() {
    let store = MemoryStore::new();

    let state = migrator().check(&store, true).await;

    assert_eq!(state, SchemaState::Migrated { from: 0, version: 3 });
    assert_eq!(store.applied_versions(), vec![1, 2, 3]);
    assert!(!store.is_locked(DEFAULT_LOCK_NAME));

    let service = RwService::new(store, MappingRegistry::default(), state);
    assert!(service.is_ready());
    assert_eq!(service.schema_check().unwrap(), "Database schema is at version 3");

    // A second instance starting later sees a matching schema.
    let again = migrator().check(service.store(), true).await;
    assert_eq!(again, SchemaState::Matched { version: 3 });
}

#[tokio::test]
async fn held_lock_fails_fast() {
    let store = MemoryStore::new();
    assert!(store.hold_lock(DEFAULT_LOCK_NAME));

    let state = migrator().check(&store, true).await;

    assert_eq!(
        state,
        SchemaState::LockFailed {
            current: 0,
            required: 3
        }
    );
    assert!(store.applied_versions().is_empty());
    assert_eq!(
        state.error().unwrap().to_string(),
        "migrating database from 0 to 3 failed: unable to obtain database lock"
    );
    // The other holder keeps its lock.
    assert!(store.is_locked(DEFAULT_LOCK_NAME));
}

#[tokio::test]
async fn failed_migration_releases_lock_and_keeps_earlier_steps() {
    let store = MemoryStore::new();
    store.fail_migration(2);

    let state = migrator().check(&store, true).await;

    match &state {
        SchemaState::MigrationFailed {
            current, required, ..
        } => {
            assert_eq!((*current, *required), (0, 3));
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert!(!state.is_ready());
    assert_eq!(store.applied_versions(), vec![1]);
    assert!(!store.is_locked(DEFAULT_LOCK_NAME));
}

#[tokio::test]
async fn newer_schema_requires_downgrade() {
    let store = MemoryStore::new();
    let newer = SchemaMigrator::new(
        MigrationSet::new(vec![
            Migration::new(1, "a", "CREATE TABLE a (id TEXT)", "DROP TABLE a"),
            Migration::new(2, "b", "CREATE TABLE b (id TEXT)", "DROP TABLE b"),
        ])
        .unwrap(),
    );
    assert!(newer.check(&store, true).await.is_ready());

    let older = SchemaMigrator::new(
        MigrationSet::new(vec![Migration::new(
            1,
            "a",
            "CREATE TABLE a (id TEXT)",
            "DROP TABLE a",
        )])
        .unwrap(),
    );
    let state = older.check(&store, true).await;

    assert_eq!(
        state,
        SchemaState::DowngradeRequired {
            current: 2,
            required: 1
        }
    );
    assert_eq!(
        state.error(),
        Some(MigrationError::DowngradeRequired {
            current: 2,
            required: 1
        })
    );
    assert_eq!(store.applied_versions(), vec![1, 2]);
}

#[tokio::test]
async fn unreachable_database_leaves_version_unknown() {
    let store = MemoryStore::new();
    store.set_available(false);

    let state = migrator().check(&store, true).await;

    assert!(matches!(state, SchemaState::VersionUnknown { .. }));
    assert!(!state.is_ready());
}

#[tokio::test]
async fn ping_succeeds_while_schema_is_pending() {
    let service = memory_service(vec![common::scenario_mapping()]);
    let pending = RwService::new(
        MemoryStore::new(),
        service.registry().clone(),
        SchemaState::MismatchPending {
            current: 0,
            required: 3,
        },
    );

    assert_eq!(pending.ping().await.unwrap(), "Ping OK");
    assert!(matches!(
        pending.schema_check().unwrap_err(),
        RwError::Migration(MigrationError::Required { .. })
    ));
}
