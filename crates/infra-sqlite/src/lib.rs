// Shardbase Infrastructure - SQLite Adapter
// Implements the PartitionStore port: one write pool plus one read-only
// connection pool per partition. The only crate that touches SQLite.

mod connection;
mod manager;
mod rows;

pub use connection::{open_read_pool, open_write_pool};
pub use manager::SqlitePartitionManager;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
