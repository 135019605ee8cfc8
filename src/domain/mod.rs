pub mod context;
pub mod document;
pub mod error;
pub mod extract;
pub mod mapping;
pub mod migration;
pub mod value;

pub use context::RequestContext;
pub use document::{DocMetadata, Document};
pub use error::{MappingError, MigrationError, Operation, RwError, RwResult};
pub use mapping::{Expression, MappingRegistry, TableMapping, HASH_COLUMN};
pub use migration::{Direction, Migration, MigrationSet};
pub use value::{ColumnValue, ColumnValues};
