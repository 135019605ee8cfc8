//! PostgreSQL implementation of the document and migration stores.

use super::{
    ClassifyError, DocumentStore, FetchColumn, MigrationStore, StorageErrorKind, UpsertOutcome,
};
use crate::domain::mapping::{TableMapping, HASH_COLUMN};
use crate::domain::migration::{Direction, Migration};
use crate::domain::value::{ColumnValue, ColumnValues};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, PgPool, Postgres, Row};
use std::time::Duration;

const UNIQUE_VIOLATION: &str = "23505";

/// Table recording applied migration ordinals.
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

impl ClassifyError for sqlx::Error {
    fn kind(&self) -> StorageErrorKind {
        match self.as_database_error().and_then(|e| e.code()) {
            Some(code) if &*code == UNIQUE_VIOLATION => StorageErrorKind::UniqueViolation,
            _ => StorageErrorKind::Other,
        }
    }
}

/// Document + migration store backed by a bounded PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool of at most `max_connections`. Callers beyond the bound wait up to
    /// `acquire_timeout` for a connection; pass at least the request deadline so that
    /// exhaustion only ever shows up as queuing.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Like [`PgStore::connect`], but no connection is opened until first use.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn placeholder(mapping: &TableMapping, column: &str, idx: usize) -> String {
    match mapping.cast_for(column) {
        Some(sql_type) => format!("${}::{}", idx, sql_type),
        None => format!("${}", idx),
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &ColumnValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ColumnValue::Null => query.bind(None::<String>),
        ColumnValue::Text(s) => query.bind(s.clone()),
        ColumnValue::Integer(n) => query.bind(*n),
        ColumnValue::Float(n) => query.bind(*n),
        ColumnValue::Bool(b) => query.bind(*b),
        ColumnValue::Bytes(b) => query.bind(b.clone()),
    }
}

/// `(c1, c2)`, `($1, $2::uuid)` for an INSERT over every supplied column.
fn insert_components(mapping: &TableMapping, values: &ColumnValues) -> (String, String) {
    let columns: Vec<&str> = values.keys().map(|c| c.as_str()).collect();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| placeholder(mapping, col, idx + 1))
        .collect();
    (columns.join(", "), placeholders.join(", "))
}

fn decode_column(row: &PgRow, column: &FetchColumn<'_>) -> Result<ColumnValue, sqlx::Error> {
    if !column.as_text {
        if let Ok(v) = row.try_get::<Option<String>, _>(column.name) {
            return Ok(v.map(ColumnValue::Text).unwrap_or(ColumnValue::Null));
        }
        let v: Option<Vec<u8>> = row.try_get(column.name)?;
        return Ok(v.map(ColumnValue::Bytes).unwrap_or(ColumnValue::Null));
    }
    let v: Option<String> = row.try_get(column.name)?;
    Ok(v.map(ColumnValue::Text).unwrap_or(ColumnValue::Null))
}

#[async_trait]
impl DocumentStore for PgStore {
    type Error = sqlx::Error;

    async fn insert(&self, mapping: &TableMapping, values: &ColumnValues) -> Result<(), sqlx::Error> {
        let (columns, placeholders) = insert_components(mapping, values);
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            mapping.name(),
            columns,
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn update_if_hash(
        &self,
        mapping: &TableMapping,
        key: &str,
        previous_hash: &str,
        values: &ColumnValues,
    ) -> Result<u64, sqlx::Error> {
        let pk = mapping.primary_key();
        let updates: Vec<(&String, &ColumnValue)> =
            values.iter().filter(|(col, _)| col.as_str() != pk).collect();

        let set_clause = updates
            .iter()
            .enumerate()
            .map(|(idx, (col, _))| format!("{} = {}", col, placeholder(mapping, col, idx + 1)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {} AND {} = ${}",
            mapping.name(),
            set_clause,
            pk,
            placeholder(mapping, pk, updates.len() + 1),
            HASH_COLUMN,
            updates.len() + 2
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &updates {
            query = bind_value(query, value);
        }
        let result = query
            .bind(key.to_string())
            .bind(previous_hash.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        mapping: &TableMapping,
        values: &ColumnValues,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let pk = mapping.primary_key();
        let (columns, placeholders) = insert_components(mapping, values);
        let set_clause = values
            .keys()
            .filter(|c| c.as_str() != pk)
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect::<Vec<_>>()
            .join(", ");

        // xmax is zero only for a tuple created by this statement's insert branch.
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) \
             ON CONFLICT ({}) DO UPDATE SET {} \
             RETURNING (xmax = 0) AS inserted",
            mapping.name(),
            columns,
            placeholders,
            pk,
            set_clause
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(&self.pool).await?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn fetch(
        &self,
        mapping: &TableMapping,
        key: &str,
        columns: &[FetchColumn<'_>],
    ) -> Result<Option<ColumnValues>, sqlx::Error> {
        let select = columns
            .iter()
            .map(|c| {
                if c.as_text {
                    format!("{}::text AS {}", c.name, c.name)
                } else {
                    c.name.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            select,
            mapping.name(),
            mapping.primary_key(),
            placeholder(mapping, mapping.primary_key(), 1)
        );

        let row = sqlx::query(&sql)
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut values = ColumnValues::new();
        for column in columns {
            values.insert(column.name.to_string(), decode_column(&row, column)?);
        }
        Ok(Some(values))
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Session-scoped advisory lock. Owns the pooled connection the lock was taken on,
/// because only that session can release it.
pub struct PgMigrationLock {
    conn: PoolConnection<Postgres>,
    name: String,
}

#[async_trait]
impl MigrationStore for PgStore {
    type Error = sqlx::Error;
    type Lock = PgMigrationLock;

    async fn current_version(&self) -> Result<i64, sqlx::Error> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version_id BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            MIGRATIONS_TABLE
        ))
        .execute(&self.pool)
        .await?;

        let version: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(version_id), 0) FROM {}",
            MIGRATIONS_TABLE
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
    ) -> Result<Option<PgMigrationLock>, sqlx::Error> {
        let mut conn = tokio::time::timeout(wait, self.pool.acquire())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)??;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            return Ok(None);
        }
        Ok(Some(PgMigrationLock {
            conn,
            name: name.to_string(),
        }))
    }

    async fn apply(
        &self,
        lock: &mut PgMigrationLock,
        migration: &Migration,
        direction: Direction,
    ) -> Result<(), sqlx::Error> {
        let mut tx = lock.conn.begin().await?;

        for stmt in migration.statements(direction) {
            tracing::info!(migration = %migration.label(), ?direction, "apply: {}", stmt);
            sqlx::query(stmt).execute(&mut *tx).await?;
        }

        match direction {
            Direction::Up => {
                sqlx::query(&format!(
                    "INSERT INTO {} (version_id, name) VALUES ($1, $2)",
                    MIGRATIONS_TABLE
                ))
                .bind(migration.ordinal)
                .bind(&migration.name)
                .execute(&mut *tx)
                .await?;
            }
            Direction::Down => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE version_id = $1",
                    MIGRATIONS_TABLE
                ))
                .bind(migration.ordinal)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }

    async fn unlock(&self, mut lock: PgMigrationLock) -> Result<(), sqlx::Error> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(&lock.name)
            .fetch_one(&mut *lock.conn)
            .await;

        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Ending the session is the only other way to drop a session lock.
                tracing::error!(lock = %lock.name, "unable to release database lock");
                let _ = lock.conn.detach().close().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(lock = %lock.name, error = %e, "unable to release database lock");
                let _ = lock.conn.detach().close().await;
                Err(e)
            }
        }
    }
}
