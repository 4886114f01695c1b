// Domain Layer - Pure data types, no I/O

pub mod record;
pub mod registry;
pub mod schema;
pub mod source;

// Re-exports
pub use record::{Record, WriteOperation, WriteResult};
pub use registry::{PartitionConfig, PartitionName, Registry};
pub use schema::{ColumnType, SchemaCatalog, TableColumn, TableSchema};
pub use source::{MigrationModule, SeederModule};
