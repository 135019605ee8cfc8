//! In-process store with the same key-uniqueness and hash-guard semantics as the
//! PostgreSQL store. Every call runs under one mutex, which makes each primitive atomic.

use super::{
    ClassifyError, DocumentStore, FetchColumn, MigrationStore, StorageErrorKind, UpsertOutcome,
};
use crate::domain::mapping::{TableMapping, HASH_COLUMN};
use crate::domain::migration::{Direction, Migration};
use crate::domain::value::{ColumnValue, ColumnValues};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("duplicate key value violates unique constraint on {table} ({key})")]
    UniqueViolation { table: String, key: String },

    #[error("row has no primary key value for {table}.{column}")]
    MissingKey { table: String, column: String },

    #[error("{0}")]
    Injected(String),
}

impl ClassifyError for MemoryStoreError {
    fn kind(&self) -> StorageErrorKind {
        match self {
            MemoryStoreError::UniqueViolation { .. } => StorageErrorKind::UniqueViolation,
            _ => StorageErrorKind::Other,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<String, ColumnValues>>,
    fail_next_write: Option<String>,
    fail_next_upsert: Option<String>,
    unavailable: bool,
    applied: BTreeMap<i64, String>,
    executed: Vec<String>,
    locks: HashSet<String>,
    fail_migration: Option<i64>,
    latency: Duration,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
pub struct MemoryLock {
    name: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every document operation waits this long before touching any data.
    #[doc(hidden)]
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// The next insert, update or upsert fails with `message`.
    #[doc(hidden)]
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state().fail_next_write = Some(message.into());
    }

    /// The next upsert fails with `message`; inserts and updates are unaffected.
    #[doc(hidden)]
    pub fn fail_next_upsert(&self, message: impl Into<String>) {
        self.state().fail_next_upsert = Some(message.into());
    }

    #[doc(hidden)]
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    /// Applying the migration with this ordinal fails.
    #[doc(hidden)]
    pub fn fail_migration(&self, ordinal: i64) {
        self.state().fail_migration = Some(ordinal);
    }

    /// Takes the named lock as if another process held it.
    #[doc(hidden)]
    pub fn hold_lock(&self, name: &str) -> bool {
        self.state().locks.insert(name.to_string())
    }

    #[doc(hidden)]
    pub fn release_lock(&self, name: &str) {
        self.state().locks.remove(name);
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.state().locks.contains(name)
    }

    pub fn row(&self, table: &str, key: &str) -> Option<ColumnValues> {
        self.state().tables.get(table)?.get(key).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Inserts a row directly, bypassing the document write path.
    #[doc(hidden)]
    pub fn put_row(&self, table: &str, key: &str, row: ColumnValues) {
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), row);
    }

    pub fn applied_versions(&self) -> Vec<i64> {
        self.state().applied.keys().copied().collect()
    }

    /// Every migration statement executed so far, in order.
    pub fn executed_statements(&self) -> Vec<String> {
        self.state().executed.clone()
    }
}

fn row_key(mapping: &TableMapping, values: &ColumnValues) -> Result<String, MemoryStoreError> {
    values
        .get(mapping.primary_key())
        .and_then(ColumnValue::to_text)
        .ok_or_else(|| MemoryStoreError::MissingKey {
            table: mapping.name().to_string(),
            column: mapping.primary_key().to_string(),
        })
}

fn merge_update(mapping: &TableMapping, row: &mut ColumnValues, values: &ColumnValues) {
    for (col, value) in values {
        if col != mapping.primary_key() {
            row.insert(col.clone(), value.clone());
        }
    }
}

impl MemoryState {
    fn take_injected(&mut self) -> Result<(), MemoryStoreError> {
        match self.fail_next_write.take() {
            Some(message) => Err(MemoryStoreError::Injected(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn insert(&self, mapping: &TableMapping, values: &ColumnValues) -> Result<(), MemoryStoreError> {
        self.delay().await;
        let mut state = self.state();
        state.take_injected()?;
        let key = row_key(mapping, values)?;
        let table = state.tables.entry(mapping.name().to_string()).or_default();
        if table.contains_key(&key) {
            return Err(MemoryStoreError::UniqueViolation {
                table: mapping.name().to_string(),
                key,
            });
        }
        table.insert(key, values.clone());
        Ok(())
    }

    async fn update_if_hash(
        &self,
        mapping: &TableMapping,
        key: &str,
        previous_hash: &str,
        values: &ColumnValues,
    ) -> Result<u64, MemoryStoreError> {
        self.delay().await;
        let mut state = self.state();
        state.take_injected()?;
        let Some(row) = state
            .tables
            .get_mut(mapping.name())
            .and_then(|t| t.get_mut(key))
        else {
            return Ok(0);
        };
        if row.get(HASH_COLUMN) != Some(&ColumnValue::Text(previous_hash.to_string())) {
            return Ok(0);
        }
        merge_update(mapping, row, values);
        Ok(1)
    }

    async fn upsert(
        &self,
        mapping: &TableMapping,
        values: &ColumnValues,
    ) -> Result<UpsertOutcome, MemoryStoreError> {
        self.delay().await;
        let mut state = self.state();
        state.take_injected()?;
        if let Some(message) = state.fail_next_upsert.take() {
            return Err(MemoryStoreError::Injected(message));
        }
        let key = row_key(mapping, values)?;
        let table = state.tables.entry(mapping.name().to_string()).or_default();
        match table.get_mut(&key) {
            Some(row) => {
                merge_update(mapping, row, values);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                table.insert(key, values.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn fetch(
        &self,
        mapping: &TableMapping,
        key: &str,
        columns: &[FetchColumn<'_>],
    ) -> Result<Option<ColumnValues>, MemoryStoreError> {
        self.delay().await;
        let state = self.state();
        let Some(row) = state.tables.get(mapping.name()).and_then(|t| t.get(key)) else {
            return Ok(None);
        };
        let projected = columns
            .iter()
            .map(|c| {
                let value = row.get(c.name).cloned().unwrap_or(ColumnValue::Null);
                let value = if c.as_text {
                    value.to_text().map(ColumnValue::Text).unwrap_or(ColumnValue::Null)
                } else {
                    value
                };
                (c.name.to_string(), value)
            })
            .collect();
        Ok(Some(projected))
    }

    async fn ping(&self) -> Result<(), MemoryStoreError> {
        if self.state().unavailable {
            return Err(MemoryStoreError::Injected("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    type Error = MemoryStoreError;
    type Lock = MemoryLock;

    async fn current_version(&self) -> Result<i64, MemoryStoreError> {
        let state = self.state();
        if state.unavailable {
            return Err(MemoryStoreError::Injected("connection refused".to_string()));
        }
        Ok(state.applied.keys().next_back().copied().unwrap_or(0))
    }

    async fn try_lock(
        &self,
        name: &str,
        _wait: Duration,
    ) -> Result<Option<MemoryLock>, MemoryStoreError> {
        if !self.state().locks.insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(MemoryLock {
            name: name.to_string(),
        }))
    }

    async fn apply(
        &self,
        _lock: &mut MemoryLock,
        migration: &Migration,
        direction: Direction,
    ) -> Result<(), MemoryStoreError> {
        let mut state = self.state();
        if state.fail_migration == Some(migration.ordinal) {
            return Err(MemoryStoreError::Injected(format!(
                "migration {} failed",
                migration.label()
            )));
        }
        let statements: Vec<String> = migration
            .statements(direction)
            .into_iter()
            .map(str::to_string)
            .collect();
        state.executed.extend(statements);
        match direction {
            Direction::Up => {
                state.applied.insert(migration.ordinal, migration.name.clone());
            }
            Direction::Down => {
                state.applied.remove(&migration.ordinal);
            }
        }
        Ok(())
    }

    async fn unlock(&self, lock: MemoryLock) -> Result<(), MemoryStoreError> {
        self.state().locks.remove(&lock.name);
        Ok(())
    }
}
