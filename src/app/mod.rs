pub mod migrations;
pub mod migrator;
pub mod read;
pub mod rw_service;
pub mod write;

pub use migrator::{SchemaMigrator, SchemaState};
pub use rw_service::RwService;
pub use write::{ConflictSeverity, WriteOutcome};
