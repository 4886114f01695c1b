// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Partition not initialized: {0}")]
    PartitionNotInitialized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Migration {module} failed on partition {partition}: {source}")]
    Migration {
        partition: String,
        module: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Seeder {module} failed on partition {partition}: {source}")]
    Seed {
        partition: String,
        module: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Storage error on {context}: {message}")]
    Storage { context: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Wrap an engine error with the table/partition it happened on.
    pub fn storage(context: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Storage {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Wrap a failed migration step with partition and module context.
    pub fn migration(
        partition: impl Into<String>,
        module: impl Into<String>,
        source: AppError,
    ) -> Self {
        AppError::Migration {
            partition: partition.into(),
            module: module.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a failed seeder step with partition and module context.
    pub fn seed(partition: impl Into<String>, module: impl Into<String>, source: AppError) -> Self {
        AppError::Seed {
            partition: partition.into(),
            module: module.into(),
            source: Box::new(source),
        }
    }
}
