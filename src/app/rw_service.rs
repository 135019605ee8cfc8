//! The read/write service: mapping lookup, deadlines and monitoring on top of the
//! write orchestrator, the read projector and the schema gate.

use crate::app::migrator::{SchemaMigrator, SchemaState};
use crate::app::read::read_document;
use crate::app::write::{ConflictSeverity, DocumentWriter, WriteOutcome};
use crate::domain::context::RequestContext;
use crate::domain::document::Document;
use crate::domain::error::{MigrationError, Operation, RwError, RwResult};
use crate::domain::mapping::{MappingRegistry, TableMapping};
use crate::storage::{DocumentStore, MigrationStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub const PING_OK: &str = "Ping OK";
pub const SCHEMA_MISMATCH: &str = "Database schema is mismatched to this service";

pub struct RwService<S> {
    store: S,
    registry: MappingRegistry,
    schema: SchemaState,
    conflict_severity: ConflictSeverity,
}

impl<S: DocumentStore> RwService<S> {
    pub fn new(store: S, registry: MappingRegistry, schema: SchemaState) -> Self {
        Self {
            store,
            registry,
            schema,
            conflict_severity: ConflictSeverity::default(),
        }
    }

    /// Checks (and with `migrate`, upgrades) the schema, then builds the service.
    /// A schema problem leaves the service running but not ready.
    pub async fn start(
        store: S,
        registry: MappingRegistry,
        migrator: &SchemaMigrator,
        migrate: bool,
    ) -> Self
    where
        S: MigrationStore,
    {
        let schema = migrator.check(&store, migrate).await;
        if let Some(err) = schema.error() {
            tracing::error!(error = %err, "failed to migrate db");
        }
        Self::new(store, registry, schema)
    }

    pub fn with_conflict_severity(mut self, severity: ConflictSeverity) -> Self {
        self.conflict_severity = severity;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn schema_state(&self) -> &SchemaState {
        &self.schema
    }

    pub fn is_ready(&self) -> bool {
        self.schema.is_ready()
    }

    pub async fn read(&self, ctx: &RequestContext, table: &str, key: &str) -> RwResult<Document> {
        let mapping = self.mapping(table)?;
        tracing::info!(
            table = %table,
            key = %key,
            transaction_id = %ctx.transaction_id,
            "reading document from database"
        );
        within_deadline(
            ctx,
            Operation::Read,
            read_document(&self.store, &mapping, key, ctx),
        )
        .await
    }

    /// Stores `doc` under `key`. `previous_hash` is the hash the caller last saw,
    /// empty when it knows of no prior version.
    pub async fn write(
        &self,
        ctx: &RequestContext,
        table: &str,
        key: &str,
        doc: Document,
        params: &HashMap<String, String>,
        previous_hash: &str,
    ) -> RwResult<WriteOutcome> {
        let mapping = self.mapping(table)?;
        tracing::info!(
            table = %table,
            key = %key,
            transaction_id = %ctx.transaction_id,
            "writing document to database"
        );
        let writer = DocumentWriter::new(&self.store, &mapping, key, ctx)
            .conflict_severity(self.conflict_severity);
        within_deadline(ctx, Operation::Write, writer.write(doc, params, previous_hash)).await
    }

    pub async fn ping(&self) -> RwResult<String> {
        self.store.ping().await.map_err(|e| {
            tracing::error!(error = %e, "database ping failed");
            RwError::Unavailable {
                source: Box::new(e),
            }
        })?;
        Ok(PING_OK.to_string())
    }

    pub fn schema_check(&self) -> RwResult<String> {
        if let Some(version) = self.schema.version() {
            return Ok(format!("Database schema is at version {}", version));
        }
        Err(self.schema.error().unwrap_or(MigrationError::Unchecked).into())
    }

    fn mapping(&self, table: &str) -> RwResult<Arc<TableMapping>> {
        self.registry.get(table).ok_or_else(|| {
            tracing::error!(table = %table, "no mapping is configured for table");
            RwError::UnknownTable {
                table: table.to_string(),
            }
        })
    }
}

/// Races `fut` against the caller's deadline. Losing the race drops `fut`; a statement
/// already sent to the database may still complete.
async fn within_deadline<T>(
    ctx: &RequestContext,
    operation: Operation,
    fut: impl Future<Output = RwResult<T>>,
) -> RwResult<T> {
    let Some(deadline) = ctx.deadline else {
        return fut.await;
    };
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                transaction_id = %ctx.transaction_id,
                %operation,
                "document {} request timed out",
                operation
            );
            Err(RwError::Timeout { operation })
        }
    }
}
