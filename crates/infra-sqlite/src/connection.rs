// SQLite Pool Setup

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use shardbase_core::error::{AppError, Result};

/// Single-connection pool through which all writes to a partition are
/// serialized. Creates the database file (and parent directories) when
/// missing.
pub async fn open_write_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| AppError::storage(path.display().to_string(), e.to_string()))
}

/// Fixed pool of read-only connections to the same file. Isolation from
/// the writer, not independent copies of the data. The write pool must
/// have created the file first.
pub async fn open_read_pool(path: &Path, connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .read_only(true)
        .create_if_missing(false);

    SqlitePoolOptions::new()
        .max_connections(connections)
        .connect_with(options)
        .await
        .map_err(|e| AppError::storage(path.display().to_string(), e.to_string()))
}
