//! Write orchestration: persists one document under one key using either an
//! unconditional upsert or hash-gated optimistic concurrency.

use crate::crypto::hashing::hash_document;
use crate::domain::context::RequestContext;
use crate::domain::document::Document;
use crate::domain::error::{RwError, RwResult};
use crate::domain::extract::extract_column_values;
use crate::domain::mapping::TableMapping;
use crate::domain::value::ColumnValues;
use crate::storage::{ClassifyError, DocumentStore, StorageErrorKind, UpsertOutcome};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const CONFLICT_MESSAGE: &str = "document hash conflict detected while updating document";

/// Level at which a lost optimistic write is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    #[default]
    Warn,
    Error,
}

impl FromStr for ConflictSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" | "warning" => Ok(ConflictSeverity::Warn),
            "error" => Ok(ConflictSeverity::Error),
            other => Err(format!("unknown conflict severity '{}'", other)),
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Warn => f.write_str("warn"),
            ConflictSeverity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// True only when this call genuinely inserted the row.
    pub created: bool,
    /// Hash of the body supplied to this call.
    pub hash: String,
}

/// One write of one document. Borrowed state only; build a new one per request.
pub struct DocumentWriter<'a, S> {
    store: &'a S,
    mapping: &'a TableMapping,
    key: &'a str,
    ctx: &'a RequestContext,
    conflict_severity: ConflictSeverity,
}

impl<'a, S: DocumentStore> DocumentWriter<'a, S> {
    pub fn new(
        store: &'a S,
        mapping: &'a TableMapping,
        key: &'a str,
        ctx: &'a RequestContext,
    ) -> Self {
        Self {
            store,
            mapping,
            key,
            ctx,
            conflict_severity: ConflictSeverity::default(),
        }
    }

    pub fn conflict_severity(mut self, severity: ConflictSeverity) -> Self {
        self.conflict_severity = severity;
        self
    }

    /// Persists `doc`. The stored and returned hash is always recomputed from `doc.body`;
    /// `previous_hash` is only used as the compare-and-swap token, empty meaning
    /// "no known prior version".
    pub async fn write(
        self,
        mut doc: Document,
        params: &HashMap<String, String>,
        previous_hash: &str,
    ) -> RwResult<WriteOutcome> {
        doc.hash = hash_document(&doc.body);
        let values = extract_column_values(self.mapping, self.key, &doc, params, self.ctx)?;

        let created = if !self.mapping.has_conflict_detection() {
            self.upsert(&values).await?
        } else if previous_hash.is_empty() {
            self.insert_detecting_conflict(&values).await?
        } else {
            self.update_detecting_conflict(previous_hash, &values).await?
        };

        tracing::debug!(
            table = self.mapping.name(),
            key = %self.key,
            transaction_id = %self.ctx.transaction_id,
            created,
            hash = %doc.hash,
            "document written"
        );
        Ok(WriteOutcome {
            created,
            hash: doc.hash,
        })
    }

    async fn insert_detecting_conflict(&self, values: &ColumnValues) -> RwResult<bool> {
        match self.store.insert(self.mapping, values).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == StorageErrorKind::UniqueViolation => {
                self.log_conflict("");
                self.upsert(values).await.map(|_| false)
            }
            Err(e) => Err(self.database_error(e)),
        }
    }

    async fn update_detecting_conflict(
        &self,
        previous_hash: &str,
        values: &ColumnValues,
    ) -> RwResult<bool> {
        let affected = self
            .store
            .update_if_hash(self.mapping, self.key, previous_hash, values)
            .await
            .map_err(|e| self.database_error(e))?;
        if affected == 0 {
            self.log_conflict(previous_hash);
            self.upsert(values).await?;
        }
        Ok(false)
    }

    async fn upsert(&self, values: &ColumnValues) -> RwResult<bool> {
        match self.store.upsert(self.mapping, values).await {
            Ok(UpsertOutcome::Inserted) => Ok(true),
            Ok(UpsertOutcome::Updated) => Ok(false),
            Err(e) => Err(self.database_error(e)),
        }
    }

    fn log_conflict(&self, previous_hash: &str) {
        match self.conflict_severity {
            ConflictSeverity::Warn => tracing::warn!(
                table = self.mapping.name(),
                key = %self.key,
                transaction_id = %self.ctx.transaction_id,
                previous_hash = %previous_hash,
                "{}",
                CONFLICT_MESSAGE
            ),
            ConflictSeverity::Error => tracing::error!(
                table = self.mapping.name(),
                key = %self.key,
                transaction_id = %self.ctx.transaction_id,
                previous_hash = %previous_hash,
                "{}",
                CONFLICT_MESSAGE
            ),
        }
    }

    fn database_error(&self, e: S::Error) -> RwError {
        tracing::error!(
            table = self.mapping.name(),
            key = %self.key,
            transaction_id = %self.ctx.transaction_id,
            error = %e,
            "unable to write document to database"
        );
        RwError::Database {
            table: self.mapping.name().to_string(),
            key: self.key.to_string(),
            transaction_id: self.ctx.transaction_id.clone(),
            source: Box::new(e),
        }
    }
}
