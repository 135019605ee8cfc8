pub mod app;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::{ConflictSeverity, RwService, SchemaMigrator, SchemaState, WriteOutcome};
pub use crypto::hashing::hash_document;
pub use domain::{Document, MappingRegistry, RequestContext, RwError, RwResult, TableMapping};
pub use infra::{RwConfig, Settings};
pub use storage::{DocumentStore, MemoryStore, MigrationStore, PgStore};
