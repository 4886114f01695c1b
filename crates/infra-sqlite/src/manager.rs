// SQLite Partition Manager
// Owns, per partition, one write pool (all writes serialized) and one
// read-only connection pool, and routes statements by table. Grouped
// writes run as one native transaction per partition.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, instrument};

use shardbase_core::domain::{PartitionName, Record, Registry, WriteOperation, WriteResult};
use shardbase_core::error::{AppError, Result};
use shardbase_core::port::PartitionStore;

use crate::connection::{open_read_pool, open_write_pool};
use crate::rows::{bind_params, record_from_row};

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(context: &str, err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            let message = match db_err.code().as_deref() {
                Some("2067") | Some("1555") => {
                    format!("Unique constraint violation: {}", db_err.message())
                }
                Some("787") | Some("3850") => {
                    format!("Foreign key constraint violation: {}", db_err.message())
                }
                Some("5") => format!("Database locked (SQLITE_BUSY): {}", db_err.message()),
                Some("13") => format!("Database full: {}", db_err.message()),
                Some(code) => format!("Database error [{}]: {}", code, db_err.message()),
                None => format!("Database error: {}", db_err.message()),
            };
            AppError::storage(context, message)
        }
        sqlx::Error::RowNotFound => AppError::storage(context, "Row not found"),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::storage(context, format!("Column not found: {col}"))
        }
        _ => AppError::storage(context, err.to_string()),
    }
}

struct PartitionPools {
    write: SqlitePool,
    read: SqlitePool,
}

pub struct SqlitePartitionManager {
    routing: HashMap<String, PartitionName>,
    // Registry order preserved; lookups scan (partition counts are small)
    partitions: Vec<(PartitionName, PartitionPools)>,
}

impl SqlitePartitionManager {
    /// Open pools for every partition in the registry. The write pool is
    /// opened first so the database file exists before the read-only
    /// pool connects to it.
    pub async fn open(registry: Registry) -> Result<Self> {
        let routing = registry.routing();
        let mut partitions = Vec::with_capacity(registry.partitions.len());

        for config in registry.partitions {
            let path = Path::new(&config.file_path).to_path_buf();
            let write = open_write_pool(&path).await?;
            let read = open_read_pool(&path, config.read_connections).await?;
            info!(
                partition = %config.name,
                path = %config.file_path,
                read_connections = config.read_connections,
                "Partition opened"
            );
            partitions.push((config.name, PartitionPools { write, read }));
        }

        Ok(Self {
            routing,
            partitions,
        })
    }

    fn pools(&self, partition: &str) -> Result<&PartitionPools> {
        self.partitions
            .iter()
            .find(|(name, _)| name == partition)
            .map(|(_, pools)| pools)
            .ok_or_else(|| AppError::PartitionNotInitialized(partition.to_string()))
    }

    fn pools_for_table(&self, table: &str) -> Result<(&str, &PartitionPools)> {
        let partition = self
            .routing
            .get(table)
            .ok_or_else(|| AppError::UnknownTable(table.to_string()))?;
        Ok((partition, self.pools(partition)?))
    }

    async fn run_write(
        &self,
        pool: &SqlitePool,
        sql: &str,
        params: &[Value],
        context: &str,
    ) -> Result<WriteResult> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error(context, e))?;
        Ok(WriteResult {
            rows_affected: result.rows_affected(),
            last_insert_rowid: result.last_insert_rowid(),
        })
    }

    async fn run_read(
        &self,
        pool: &SqlitePool,
        sql: &str,
        params: &[Value],
        context: &str,
    ) -> Result<Vec<Record>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(pool)
            .await
            .map_err(|e| map_sqlx_error(context, e))?;
        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl PartitionStore for SqlitePartitionManager {
    fn resolve_partition(&self, table: &str) -> Result<PartitionName> {
        self.routing
            .get(table)
            .cloned()
            .ok_or_else(|| AppError::UnknownTable(table.to_string()))
    }

    fn partition_names(&self) -> Vec<PartitionName> {
        self.partitions.iter().map(|(name, _)| name.clone()).collect()
    }

    #[instrument(skip(self, params))]
    async fn execute_write(
        &self,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<WriteResult> {
        let (partition, pools) = self.pools_for_table(table)?;
        let context = format!("{partition}/{table}");
        self.run_write(&pools.write, sql, &params, &context).await
    }

    #[instrument(skip(self, params))]
    async fn execute_read(
        &self,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>> {
        let (partition, pools) = self.pools_for_table(table)?;
        let context = format!("{partition}/{table}");
        self.run_read(&pools.read, sql, &params, &context).await
    }

    #[instrument(skip(self, ops), fields(op_count = ops.len()))]
    async fn execute_grouped(&self, ops: Vec<WriteOperation>) -> Result<Vec<WriteResult>> {
        // Group operation indexes by resolved partition, preserving
        // relative order within each partition and first-seen partition
        // order across groups.
        let mut groups: Vec<(PartitionName, Vec<usize>)> = Vec::new();
        for (idx, op) in ops.iter().enumerate() {
            let partition = self.resolve_partition(&op.table)?;
            match groups.iter_mut().find(|(name, _)| *name == partition) {
                Some((_, indexes)) => indexes.push(idx),
                None => groups.push((partition, vec![idx])),
            }
        }

        // One transaction per partition. Same-partition operations are
        // all-or-nothing; partitions already committed stay committed if
        // a later group fails.
        let mut results: Vec<Option<WriteResult>> = vec![None; ops.len()];
        for (partition, indexes) in groups {
            let pools = self.pools(&partition)?;
            let mut tx = pools
                .write
                .begin()
                .await
                .map_err(|e| map_sqlx_error(&partition, e))?;

            for idx in indexes {
                let op = &ops[idx];
                let context = format!("{partition}/{}", op.table);
                let result = bind_params(sqlx::query(&op.sql), &op.params)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(&context, e))?;
                results[idx] = Some(WriteResult {
                    rows_affected: result.rows_affected(),
                    last_insert_rowid: result.last_insert_rowid(),
                });
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error(&partition, e))?;
            debug!(partition = %partition, "Grouped transaction committed");
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, result)| {
                result.ok_or_else(|| {
                    AppError::Internal(format!("Missing result for grouped operation {idx}"))
                })
            })
            .collect()
    }

    #[instrument(skip(self, params))]
    async fn execute_on_partition(
        &self,
        partition: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<WriteResult> {
        let pools = self.pools(partition)?;
        self.run_write(&pools.write, sql, &params, partition).await
    }

    #[instrument(skip(self, params))]
    async fn query_on_partition(
        &self,
        partition: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>> {
        let pools = self.pools(partition)?;
        self.run_read(&pools.write, sql, &params, partition).await
    }

    #[instrument(skip(self, statements), fields(statement_count = statements.len()))]
    async fn execute_batch_on_partition(
        &self,
        partition: &str,
        statements: Vec<String>,
    ) -> Result<()> {
        let pools = self.pools(partition)?;
        let mut tx = pools
            .write
            .begin()
            .await
            .map_err(|e| map_sqlx_error(partition, e))?;

        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(partition, e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error(partition, e))
    }

    async fn ping(&self, partition: &str) -> Result<()> {
        let pools = self.pools(partition)?;
        sqlx::query("SELECT 1")
            .execute(&pools.write)
            .await
            .map_err(|e| map_sqlx_error(partition, e))?;
        Ok(())
    }

    /// VACUUM reclaims space and defragments; reports reclaimed MiB.
    #[instrument(skip(self))]
    async fn vacuum(&self, partition: &str) -> Result<f64> {
        let pools = self.pools(partition)?;
        let size_before = database_size_mib(&pools.write, partition).await?;

        sqlx::query("VACUUM")
            .execute(&pools.write)
            .await
            .map_err(|e| map_sqlx_error(partition, e))?;

        let size_after = database_size_mib(&pools.write, partition).await?;
        let reclaimed = (size_before - size_after).max(0.0);
        info!(partition, reclaimed_mib = reclaimed, "VACUUM completed");
        Ok(reclaimed)
    }

    async fn close(&self) {
        for (name, pools) in &self.partitions {
            pools.write.close().await;
            pools.read.close().await;
            debug!(partition = %name, "Partition pools closed");
        }
    }
}

async fn database_size_mib(pool: &SqlitePool, context: &str) -> Result<f64> {
    let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error(context, e))?;
    let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error(context, e))?;
    Ok((page_count * page_size) as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardbase_core::domain::PartitionConfig;

    async fn open_manager(dir: &Path) -> SqlitePartitionManager {
        let registry = Registry::new(vec![
            PartitionConfig {
                name: "ledger".into(),
                file_path: dir.join("ledger.db").to_string_lossy().into_owned(),
                tables: vec!["accounts".into(), "ledger_entries".into()],
                read_connections: 2,
            },
            PartitionConfig {
                name: "commerce".into(),
                file_path: dir.join("commerce.db").to_string_lossy().into_owned(),
                tables: vec!["orders".into()],
                read_connections: 2,
            },
        ]);
        let manager = SqlitePartitionManager::open(registry).await.unwrap();
        manager
            .execute_batch_on_partition(
                "ledger",
                vec!["CREATE TABLE accounts (id TEXT PRIMARY KEY, name TEXT NOT NULL)".into()],
            )
            .await
            .unwrap();
        manager
            .execute_batch_on_partition(
                "commerce",
                vec!["CREATE TABLE orders (id TEXT PRIMARY KEY, status TEXT)".into()],
            )
            .await
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn resolve_routes_by_registry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;
        assert_eq!(manager.resolve_partition("accounts").unwrap(), "ledger");
        assert_eq!(manager.resolve_partition("orders").unwrap(), "commerce");
        assert!(matches!(
            manager.resolve_partition("unknown"),
            Err(AppError::UnknownTable(_))
        ));
        manager.close().await;
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;

        let result = manager
            .execute_write(
                "accounts",
                "INSERT INTO accounts (id, name) VALUES (?, ?)",
                vec![json!("a1"), json!("Checking")],
            )
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);

        let rows = manager
            .execute_read(
                "accounts",
                "SELECT * FROM accounts WHERE id = ?",
                vec![json!("a1")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&json!("Checking")));

        manager.close().await;
    }

    #[tokio::test]
    async fn write_error_carries_partition_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;

        let err = manager
            .execute_write(
                "accounts",
                "INSERT INTO accounts (id, name) VALUES (?, ?)",
                vec![json!("a1"), Value::Null],
            )
            .await
            .unwrap_err();
        match err {
            AppError::Storage { context, .. } => assert_eq!(context, "ledger/accounts"),
            other => panic!("expected storage error, got {other:?}"),
        }
        manager.close().await;
    }

    #[tokio::test]
    async fn grouped_same_partition_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;

        let ops = vec![
            WriteOperation {
                table: "accounts".into(),
                sql: "INSERT INTO accounts (id, name) VALUES (?, ?)".into(),
                params: vec![json!("a1"), json!("ok")],
            },
            WriteOperation {
                table: "accounts".into(),
                sql: "INSERT INTO accounts (id, name) VALUES (?, ?)".into(),
                params: vec![json!("a2"), Value::Null], // NOT NULL violation
            },
        ];
        assert!(manager.execute_grouped(ops).await.is_err());

        let rows = manager
            .execute_read("accounts", "SELECT * FROM accounts", vec![])
            .await
            .unwrap();
        assert!(rows.is_empty(), "failed transaction must leave no rows");
        manager.close().await;
    }

    #[tokio::test]
    async fn grouped_results_keep_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;

        let ops = vec![
            WriteOperation {
                table: "orders".into(),
                sql: "INSERT INTO orders (id, status) VALUES (?, ?)".into(),
                params: vec![json!("o1"), json!("new")],
            },
            WriteOperation {
                table: "accounts".into(),
                sql: "INSERT INTO accounts (id, name) VALUES (?, ?)".into(),
                params: vec![json!("a1"), json!("Checking")],
            },
            WriteOperation {
                table: "orders".into(),
                sql: "UPDATE orders SET status = ? WHERE id = ?".into(),
                params: vec![json!("paid"), json!("o1")],
            },
        ];
        let results = manager.execute_grouped(ops).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].rows_affected, 1, "update saw the earlier insert");
        manager.close().await;
    }

    #[tokio::test]
    async fn ping_and_vacuum() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;
        manager.ping("ledger").await.unwrap();
        assert!(matches!(
            manager.ping("nope").await,
            Err(AppError::PartitionNotInitialized(_))
        ));
        let reclaimed = manager.vacuum("ledger").await.unwrap();
        assert!(reclaimed >= 0.0);
        manager.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path()).await;
        manager.close().await;
        manager.close().await;
    }
}
