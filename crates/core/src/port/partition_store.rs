// Partition Store Port (Interface)
//
// The Connection Manager behind this port is the only component that
// touches SQLite. Trackers and the Data Service never open their own
// handles; every statement they run is mediated here.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{PartitionName, Record, WriteOperation, WriteResult};
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Resolve a table to its owning partition. Exact lookup against the
    /// registry; `UnknownTable` when no partition owns the table.
    fn resolve_partition(&self, table: &str) -> Result<PartitionName>;

    /// All configured partitions, in registry order.
    fn partition_names(&self) -> Vec<PartitionName>;

    /// Run a mutating statement through the owning partition's write
    /// handle.
    async fn execute_write(
        &self,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<WriteResult>;

    /// Run a query against one of the owning partition's read
    /// connections. Pool acquisition is the handle selection.
    async fn execute_read(&self, table: &str, sql: &str, params: Vec<Value>)
        -> Result<Vec<Record>>;

    /// Run grouped writes: operations are grouped by resolved partition
    /// preserving relative order, and each partition's group runs inside
    /// one native transaction. Groups on different partitions are
    /// independent transactions; a later group failing does NOT roll back
    /// an earlier group's commit.
    async fn execute_grouped(&self, ops: Vec<WriteOperation>) -> Result<Vec<WriteResult>>;

    /// Run a mutating statement on a named partition's write handle
    /// (bookkeeping and administration).
    async fn execute_on_partition(
        &self,
        partition: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<WriteResult>;

    /// Query through a named partition's write handle, so bookkeeping
    /// reads always see the latest applied state.
    async fn query_on_partition(
        &self,
        partition: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>>;

    /// Run a list of statements inside one transaction on a partition's
    /// write handle.
    async fn execute_batch_on_partition(
        &self,
        partition: &str,
        statements: Vec<String>,
    ) -> Result<()>;

    /// Trivial liveness probe against the partition's write handle.
    async fn ping(&self, partition: &str) -> Result<()>;

    /// VACUUM the partition's file; returns reclaimed space in MiB.
    async fn vacuum(&self, partition: &str) -> Result<f64>;

    /// Release every write and read handle across every partition.
    /// Idempotent; waits for in-flight acquisitions to drain.
    async fn close(&self);
}
