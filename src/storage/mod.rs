//! Storage seams: the document store, the migration store and the error classifier
//! the write path relies on.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryStoreError};
pub use postgres::{PgMigrationLock, PgStore};

use crate::domain::mapping::TableMapping;
use crate::domain::migration::{Direction, Migration};
use crate::domain::value::ColumnValues;
use async_trait::async_trait;
use std::time::Duration;

/// Driver-independent classification of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The primary key (or another unique constraint) already holds this value.
    UniqueViolation,
    Other,
}

/// Implemented by each driver adapter's error type.
pub trait ClassifyError {
    fn kind(&self) -> StorageErrorKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// A column requested by a read. `as_text` columns are converted to text by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchColumn<'a> {
    pub name: &'a str,
    pub as_text: bool,
}

/// Row-level primitives the write and read paths are built on.
///
/// `update_if_hash` and the primary key's uniqueness are the compare-and-swap
/// primitives; the store must execute each call atomically.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Error: ClassifyError + std::error::Error + Send + Sync + 'static;

    /// Plain insert. A duplicate key must classify as [`StorageErrorKind::UniqueViolation`].
    async fn insert(&self, mapping: &TableMapping, values: &ColumnValues) -> Result<(), Self::Error>;

    /// Updates the row under `key` only while its hash equals `previous_hash`.
    /// Returns the number of affected rows.
    async fn update_if_hash(
        &self,
        mapping: &TableMapping,
        key: &str,
        previous_hash: &str,
        values: &ColumnValues,
    ) -> Result<u64, Self::Error>;

    /// Insert, or update every supplied non-key column when the key exists.
    async fn upsert(
        &self,
        mapping: &TableMapping,
        values: &ColumnValues,
    ) -> Result<UpsertOutcome, Self::Error>;

    async fn fetch(
        &self,
        mapping: &TableMapping,
        key: &str,
        columns: &[FetchColumn<'_>],
    ) -> Result<Option<ColumnValues>, Self::Error>;

    async fn ping(&self) -> Result<(), Self::Error>;
}

/// Persistence of the schema version plus the cluster-wide migration lock.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    /// Proof of holding the named lock; handed back to [`MigrationStore::unlock`].
    type Lock: Send;

    /// Highest applied ordinal, 0 for a fresh database.
    async fn current_version(&self) -> Result<i64, Self::Error>;

    /// Single non-blocking attempt. `None` when another session holds the lock.
    /// `wait` bounds any wait for the resources needed to make the attempt.
    async fn try_lock(&self, name: &str, wait: Duration) -> Result<Option<Self::Lock>, Self::Error>;

    /// Applies one migration in one direction as a single atomic unit, recording it
    /// in the migration history.
    async fn apply(
        &self,
        lock: &mut Self::Lock,
        migration: &Migration,
        direction: Direction,
    ) -> Result<(), Self::Error>;

    async fn unlock(&self, lock: Self::Lock) -> Result<(), Self::Error>;
}
