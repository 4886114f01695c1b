// Row and Write Primitives

use serde::{Deserialize, Serialize};

/// A row returned from a read, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One parameterized mutating statement, routed by table.
///
/// Never persisted; only grouped by resolved partition for the duration of
/// one transactional execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOperation {
    pub table: String,
    pub sql: String,
    pub params: Vec<serde_json::Value>,
}

/// Outcome of a single write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub rows_affected: u64,
    pub last_insert_rowid: i64,
}
