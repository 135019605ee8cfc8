//! Error types for the read/write service.

use std::fmt;
use thiserror::Error;

/// Result type for read/write operations.
pub type RwResult<T> = Result<T, RwError>;

/// Boxed driver error carried by [`RwError::Database`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// Errors surfaced by the read/write service.
#[derive(Debug, Error)]
pub enum RwError {
    /// The table mapping has no `$` column, so no document can be read back.
    #[error("document column is not configured for table {table}")]
    Configuration { table: String },

    /// No mapping is registered under the requested table name.
    #[error("no mapping is configured for table {table}")]
    UnknownTable { table: String },

    /// No row matches the key.
    #[error("no document found in table {table} for key {key}")]
    NotFound { table: String, key: String },

    /// The document body cannot be interpreted the way the mapping requires.
    #[error("document in table {table} for key {key} is invalid: {reason}")]
    InvalidDocument {
        table: String,
        key: String,
        reason: String,
    },

    /// Any driver or SQL failure, unchanged, with request context attached.
    #[error("database error on table {table} for key {key} (transaction {transaction_id}): {source}")]
    Database {
        table: String,
        key: String,
        transaction_id: String,
        #[source]
        source: BoxError,
    },

    /// The database could not be reached.
    #[error("Ping Not OK: {source}")]
    Unavailable {
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The caller's deadline expired. The database operation may still complete.
    #[error("document {operation} request timed out")]
    Timeout { operation: Operation },
}

impl RwError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RwError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RwError::Timeout { .. })
    }
}

/// Schema version and migration failures. Fatal to readiness, not to liveness.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("migrating database from {current} to {required} is required")]
    Required { current: i64, required: i64 },

    #[error("migrating database DOWN from {current} to {required} is required")]
    DowngradeRequired { current: i64, required: i64 },

    #[error("migrating database from {current} to {required} failed: unable to obtain database lock")]
    LockFailed { current: i64, required: i64 },

    #[error("migrating database from {current} to {required} failed: {reason}")]
    Failed {
        current: i64,
        required: i64,
        reason: String,
    },

    #[error("unable to discover database schema version: {reason}")]
    VersionUnknown { reason: String },

    #[error("invalid migration list: {reason}")]
    InvalidMigrations { reason: String },

    #[error("database schema has not been checked")]
    Unchecked,
}

/// Errors raised while validating a table mapping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("table {table}: '{ident}' is not a valid SQL identifier")]
    InvalidIdentifier { table: String, ident: String },

    #[error("table {table}, column {column}: {reason}")]
    InvalidExpression {
        table: String,
        column: String,
        reason: String,
    },

    #[error("table {table}: column '{column}' is reserved and cannot be mapped")]
    ReservedColumn { table: String, column: String },

    #[error("table {table}: column '{column}' is mapped more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table}: only one column may map the whole document ('$'), found {count}")]
    MultipleBodyColumns { table: String, count: usize },

    #[error("table {table}: a primary key column is required")]
    MissingPrimaryKey { table: String },

    #[error("table {table} is configured more than once with different mappings")]
    DuplicateTable { table: String },
}
