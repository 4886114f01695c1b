// Data Service
// Root of the access layer: schema bootstrap, generic CRUD with
// allowlist-validated dynamic SQL, the one grouped multi-row write, and
// migration/seeder administration. All storage access goes through the
// PartitionStore port.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument, warn};

use crate::application::migrations::{
    MigrationRecord, MigrationStatus, MigrationTracker, MIGRATIONS_TABLE_SQL,
};
use crate::application::seeders::{SeedRecord, SeedTracker, SeederStatus, SEEDERS_TABLE_SQL};
use crate::domain::{PartitionName, Record, SchemaCatalog, TableSchema, WriteOperation};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, PartitionStore, TimeProvider};

/// Health probe outcome for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionHealth {
    Healthy,
    Unhealthy { message: String },
}

/// Per-partition outcome of schema bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Ready,
    Failed { message: String },
}

/// Input to `create_with_line_items`: one row waiting for an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub table: String,
    pub fields: Map<String, Value>,
}

pub struct DataService {
    store: Arc<dyn PartitionStore>,
    catalog: Arc<SchemaCatalog>,
    migrations: MigrationTracker,
    seeders: SeedTracker,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl DataService {
    pub fn new(
        store: Arc<dyn PartitionStore>,
        catalog: Arc<SchemaCatalog>,
        migrations: MigrationTracker,
        seeders: SeedTracker,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            catalog,
            migrations,
            seeders,
            id_provider,
            time_provider,
        }
    }

    // --- schema bootstrap ---

    /// Create the baseline tables (plus bookkeeping tables) on every
    /// partition, one transaction per partition. A failing partition is
    /// reported and logged, never aborts the others; partial bootstrap
    /// surfaces through `health_check`.
    #[instrument(skip(self))]
    pub async fn bootstrap_schema(&self) -> BTreeMap<PartitionName, BootstrapOutcome> {
        let mut report = BTreeMap::new();
        for partition in self.store.partition_names() {
            let statements = self.baseline_statements(&partition);
            match self
                .store
                .execute_batch_on_partition(&partition, statements)
                .await
            {
                Ok(()) => {
                    info!(partition = %partition, "Baseline schema ready");
                    report.insert(partition, BootstrapOutcome::Ready);
                }
                Err(e) => {
                    error!(partition = %partition, error = %e, "Schema bootstrap failed");
                    report.insert(
                        partition,
                        BootstrapOutcome::Failed {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        report
    }

    fn baseline_statements(&self, partition: &str) -> Vec<String> {
        let mut statements = Vec::new();
        for schema in self.catalog.tables() {
            match self.store.resolve_partition(&schema.name) {
                Ok(owner) if owner == partition => {
                    statements.push(schema.create_sql());
                    if let Some(index) = schema.owner_index_sql() {
                        statements.push(index);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(table = %schema.name, error = %e, "Catalog table has no partition")
                }
            }
        }
        statements.push(MIGRATIONS_TABLE_SQL.to_string());
        statements.push(SEEDERS_TABLE_SQL.to_string());
        statements
    }

    // --- generic CRUD ---

    /// Insert one row. Field names are checked against the table's
    /// allowlist before they become SQL identifiers; the id is always
    /// generated here.
    #[instrument(skip(self, fields))]
    pub async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<String> {
        let schema = self.catalog.table(table)?;
        if fields.is_empty() {
            return Err(AppError::Validation(format!(
                "No fields provided for insert into {table}"
            )));
        }
        check_fields(schema, &fields)?;

        let mut fields = fields;
        self.fill_recency(schema, &mut fields);

        let id = self.id_provider.generate_id();
        let op = insert_operation(table, &id, &fields);
        self.store.execute_write(table, &op.sql, op.params).await?;
        Ok(id)
    }

    /// Fetch one row by id.
    pub async fn read(&self, table: &str, id: &str) -> Result<Option<Record>> {
        self.catalog.table(table)?;
        let rows = self
            .store
            .execute_read(
                table,
                &format!("SELECT * FROM {table} WHERE id = ?"),
                vec![json!(id)],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Update a row in place. `NotFound` when no row matched.
    #[instrument(skip(self, fields))]
    pub async fn update(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let schema = self.catalog.table(table)?;
        if fields.is_empty() {
            return Err(AppError::Validation(format!(
                "No fields provided for update of {table}"
            )));
        }
        check_fields(schema, &fields)?;

        let assignments: Vec<String> = fields.keys().map(|k| format!("{k} = ?")).collect();
        let mut params: Vec<Value> = fields.values().cloned().collect();
        params.push(json!(id));

        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ?",
            assignments.join(", ")
        );
        let result = self.store.execute_write(table, &sql, params).await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("{table} row {id} not found")));
        }
        Ok(())
    }

    /// Delete a row. `NotFound` when no row matched.
    #[instrument(skip(self))]
    pub async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.catalog.table(table)?;
        let result = self
            .store
            .execute_write(
                table,
                &format!("DELETE FROM {table} WHERE id = ?"),
                vec![json!(id)],
            )
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("{table} row {id} not found")));
        }
        Ok(())
    }

    /// Equality-only filter query, AND-joined. An empty filter map
    /// returns every row.
    pub async fn query(&self, table: &str, filters: Map<String, Value>) -> Result<Vec<Record>> {
        let schema = self.catalog.table(table)?;
        check_filters(schema, &filters)?;

        let mut sql = format!("SELECT * FROM {table}");
        let mut params = Vec::new();
        if !filters.is_empty() {
            let clauses: Vec<String> = filters.keys().map(|k| format!("{k} = ?")).collect();
            sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
            params = filters.values().cloned().collect();
        }
        self.store.execute_read(table, &sql, params).await
    }

    /// All rows belonging to one owner, newest first where the table
    /// declares a recency column.
    pub async fn fetch_by_owner(
        &self,
        table: &str,
        owner_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Record>> {
        let schema = self.catalog.table(table)?;
        let owner = schema.owner_column.as_ref().ok_or_else(|| {
            AppError::Validation(format!("Table {table} has no owner column"))
        })?;

        let mut sql = format!("SELECT * FROM {table} WHERE {owner} = ?");
        if let Some(recency) = &schema.recency_column {
            sql.push_str(&format!(" ORDER BY {recency} DESC"));
        }
        let mut params = vec![json!(owner_id)];
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(json!(limit));
        }
        self.store.execute_read(table, &sql, params).await
    }

    /// The one multi-row atomic write: one operation for the parent row
    /// and one per child row, linked to the parent id through each child
    /// table's owner column, submitted as a single grouped call. Every
    /// table must resolve to the parent's partition; the registry
    /// co-location validation makes that hold for declared parent/child
    /// pairs, and it is re-checked here rather than assumed.
    #[instrument(skip(self, parent, children), fields(parent_table = %parent.table, children = children.len()))]
    pub async fn create_with_line_items(
        &self,
        parent: NewRecord,
        children: Vec<NewRecord>,
    ) -> Result<String> {
        let parent_schema = self.catalog.table(&parent.table)?;
        if parent.fields.is_empty() {
            return Err(AppError::Validation(format!(
                "No fields provided for insert into {}",
                parent.table
            )));
        }
        check_fields(parent_schema, &parent.fields)?;
        let parent_partition = self.store.resolve_partition(&parent.table)?;

        let parent_id = self.id_provider.generate_id();
        let mut parent_fields = parent.fields;
        self.fill_recency(parent_schema, &mut parent_fields);
        let mut ops = vec![insert_operation(&parent.table, &parent_id, &parent_fields)];

        for child in children {
            let child_schema = self.catalog.table(&child.table)?;
            check_fields(child_schema, &child.fields)?;

            let child_partition = self.store.resolve_partition(&child.table)?;
            if child_partition != parent_partition {
                return Err(AppError::Validation(format!(
                    "Table {} (partition {}) is not co-located with parent table {} (partition {})",
                    child.table, child_partition, parent.table, parent_partition
                )));
            }

            let owner = child_schema.owner_column.as_ref().ok_or_else(|| {
                AppError::Validation(format!(
                    "Table {} has no owner column to link parent rows",
                    child.table
                ))
            })?;

            let mut child_fields = child.fields;
            child_fields.insert(owner.clone(), json!(parent_id));
            self.fill_recency(child_schema, &mut child_fields);
            ops.push(insert_operation(
                &child.table,
                &self.id_provider.generate_id(),
                &child_fields,
            ));
        }

        self.store.execute_grouped(ops).await?;
        Ok(parent_id)
    }

    /// Probe every partition's write handle. A failing partition is
    /// reported unhealthy; the probe never aborts early.
    pub async fn health_check(&self) -> BTreeMap<PartitionName, PartitionHealth> {
        let mut report = BTreeMap::new();
        for partition in self.store.partition_names() {
            let health = match self.store.ping(&partition).await {
                Ok(()) => PartitionHealth::Healthy,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Partition failed health probe");
                    PartitionHealth::Unhealthy {
                        message: e.to_string(),
                    }
                }
            };
            report.insert(partition, health);
        }
        report
    }

    // --- administration ---

    pub async fn run_migrations(
        &self,
        partition: Option<&str>,
    ) -> Result<Vec<(PartitionName, Vec<MigrationRecord>)>> {
        let mut results = Vec::new();
        for partition in self.target_partitions(partition)? {
            let applied = self.migrations.run_pending(&partition).await?;
            results.push((partition, applied));
        }
        Ok(results)
    }

    pub async fn rollback_migration(&self, partition: &str) -> Result<Option<MigrationRecord>> {
        self.check_partition(partition)?;
        self.migrations.rollback_last(partition).await
    }

    pub async fn migration_status(&self) -> Result<Vec<MigrationStatus>> {
        let mut statuses = Vec::new();
        for partition in self.store.partition_names() {
            statuses.push(self.migrations.status(&partition).await?);
        }
        Ok(statuses)
    }

    pub async fn run_seeders(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<(PartitionName, Vec<SeedRecord>)>> {
        let mut results = Vec::new();
        for partition in self.target_partitions(partition)? {
            let applied = self.seeders.run_pending(&partition, name).await?;
            results.push((partition, applied));
        }
        Ok(results)
    }

    pub async fn reset_seeders(&self, partition: &str) -> Result<u64> {
        self.check_partition(partition)?;
        self.seeders.reset(partition).await
    }

    pub async fn refresh_seeders(&self, partition: &str) -> Result<Vec<SeedRecord>> {
        self.check_partition(partition)?;
        self.seeders.refresh(partition).await
    }

    pub async fn seeder_status(&self) -> Result<Vec<SeederStatus>> {
        let mut statuses = Vec::new();
        for partition in self.store.partition_names() {
            statuses.push(self.seeders.status(&partition).await?);
        }
        Ok(statuses)
    }

    pub async fn vacuum(&self, partition: Option<&str>) -> Result<Vec<(PartitionName, f64)>> {
        let mut results = Vec::new();
        for partition in self.target_partitions(partition)? {
            let reclaimed = self.store.vacuum(&partition).await?;
            results.push((partition, reclaimed));
        }
        Ok(results)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    fn target_partitions(&self, partition: Option<&str>) -> Result<Vec<PartitionName>> {
        match partition {
            Some(name) => {
                self.check_partition(name)?;
                Ok(vec![name.to_string()])
            }
            None => Ok(self.store.partition_names()),
        }
    }

    fn check_partition(&self, name: &str) -> Result<()> {
        if self.store.partition_names().iter().any(|p| p == name) {
            Ok(())
        } else {
            Err(AppError::PartitionNotInitialized(name.to_string()))
        }
    }

    fn fill_recency(&self, schema: &TableSchema, fields: &mut Map<String, Value>) {
        if let Some(recency) = &schema.recency_column {
            if !fields.contains_key(recency) {
                fields.insert(recency.clone(), json!(self.time_provider.now_millis()));
            }
        }
    }
}

/// Build a parameterized insert from validated field names.
fn insert_operation(table: &str, id: &str, fields: &Map<String, Value>) -> WriteOperation {
    let mut columns = vec!["id".to_string()];
    let mut params = vec![json!(id)];
    for (name, value) in fields {
        columns.push(name.clone());
        params.push(value.clone());
    }
    let placeholders = vec!["?"; params.len()].join(", ");
    WriteOperation {
        table: table.to_string(),
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        ),
        params,
    }
}

/// Reject caller-supplied names outside the table's writable allowlist.
fn check_fields(schema: &TableSchema, fields: &Map<String, Value>) -> Result<()> {
    let unknown: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|name| !schema.has_column(name))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Unknown fields for table {}: {}",
            schema.name,
            unknown.join(", ")
        )))
    }
}

/// Filters may also match on the implicit id column.
fn check_filters(schema: &TableSchema, filters: &Map<String, Value>) -> Result<()> {
    let unknown: Vec<&str> = filters
        .keys()
        .map(String::as_str)
        .filter(|name| *name != "id" && !schema.has_column(name))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Unknown filter fields for table {}: {}",
            schema.name,
            unknown.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WriteResult;
    use crate::port::partition_store::MockPartitionStore;

    struct FixedIds;
    impl IdProvider for FixedIds {
        fn generate_id(&self) -> String {
            "row_fixed".to_string()
        }
    }

    struct FixedTime;
    impl TimeProvider for FixedTime {
        fn now_millis(&self) -> i64 {
            1_700_000_000_000
        }
    }

    fn service_with(store: MockPartitionStore) -> DataService {
        let store: Arc<dyn PartitionStore> = Arc::new(store);
        let catalog = Arc::new(SchemaCatalog::stock().unwrap());
        let time: Arc<dyn TimeProvider> = Arc::new(FixedTime);
        let migrations =
            MigrationTracker::new(store.clone(), "unused-migrations", time.clone());
        let seeders = SeedTracker::new(store.clone(), "unused-seeders", time.clone());
        DataService::new(
            store,
            catalog,
            migrations,
            seeders,
            Arc::new(FixedIds),
            time,
        )
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_rejects_empty_fields() {
        let service = service_with(MockPartitionStore::new());
        let result = service.create("accounts", Map::new()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn create_rejects_unknown_table() {
        let service = service_with(MockPartitionStore::new());
        let result = service
            .create("sessions", fields(&[("name", json!("x"))]))
            .await;
        assert!(matches!(result, Err(AppError::UnknownTable(_))));
    }

    #[tokio::test]
    async fn create_rejects_fields_outside_allowlist() {
        let service = service_with(MockPartitionStore::new());
        let result = service
            .create(
                "accounts",
                fields(&[("name", json!("x")), ("name; DROP TABLE accounts", json!(1))]),
            )
            .await;
        match result {
            Err(AppError::Validation(msg)) => assert!(msg.contains("DROP TABLE"), "got: {msg}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_rejects_caller_supplied_id() {
        let service = service_with(MockPartitionStore::new());
        let result = service
            .create("accounts", fields(&[("id", json!("mine")), ("name", json!("x"))]))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn create_builds_parameterized_insert_and_fills_recency() {
        let mut store = MockPartitionStore::new();
        store
            .expect_execute_write()
            .withf(|table, sql, params| {
                table == "accounts"
                    // serde_json maps iterate sorted, so column order is stable
                    && sql == "INSERT INTO accounts (id, balance, created_at, name) VALUES (?, ?, ?, ?)"
                    && params.len() == 4
                    && params[0] == json!("row_fixed")
                    && params[2] == json!(1_700_000_000_000_i64)
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(WriteResult {
                    rows_affected: 1,
                    last_insert_rowid: 1,
                })
            });

        let service = service_with(store);
        let id = service
            .create(
                "accounts",
                fields(&[("name", json!("Checking")), ("balance", json!(0.0))]),
            )
            .await
            .unwrap();
        assert_eq!(id, "row_fixed");
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let mut store = MockPartitionStore::new();
        store.expect_execute_write().times(1).returning(|_, _, _| {
            Ok(WriteResult {
                rows_affected: 0,
                last_insert_rowid: 0,
            })
        });

        let service = service_with(store);
        let result = service
            .update("accounts", "missing", fields(&[("name", json!("x"))]))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn query_rejects_unknown_filter() {
        let service = service_with(MockPartitionStore::new());
        let result = service
            .query("accounts", fields(&[("password", json!("x"))]))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn query_allows_id_filter() {
        let mut store = MockPartitionStore::new();
        store
            .expect_execute_read()
            .withf(|_, sql, params| {
                sql == "SELECT * FROM accounts WHERE id = ?" && params.len() == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let service = service_with(store);
        service
            .query("accounts", fields(&[("id", json!("abc"))]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fetch_by_owner_requires_owner_column() {
        let service = service_with(MockPartitionStore::new());
        let result = service.fetch_by_owner("accounts", "x", None).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn fetch_by_owner_orders_by_recency() {
        let mut store = MockPartitionStore::new();
        store
            .expect_execute_read()
            .withf(|_, sql, params| {
                sql == "SELECT * FROM ledger_entries WHERE account_id = ? ORDER BY created_at DESC LIMIT ?"
                    && params.len() == 2
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let service = service_with(store);
        service
            .fetch_by_owner("ledger_entries", "acct", Some(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn grouped_create_rejects_split_partitions() {
        let mut store = MockPartitionStore::new();
        store
            .expect_resolve_partition()
            .returning(|table| match table {
                "orders" => Ok("commerce".to_string()),
                "order_items" => Ok("elsewhere".to_string()),
                other => Err(AppError::UnknownTable(other.to_string())),
            });

        let service = service_with(store);
        let result = service
            .create_with_line_items(
                NewRecord {
                    table: "orders".into(),
                    fields: fields(&[("status", json!("new"))]),
                },
                vec![NewRecord {
                    table: "order_items".into(),
                    fields: fields(&[("sku", json!("A")), ("qty", json!(1))]),
                }],
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn grouped_create_links_children_to_parent() {
        let mut store = MockPartitionStore::new();
        store
            .expect_resolve_partition()
            .returning(|_| Ok("commerce".to_string()));
        store
            .expect_execute_grouped()
            .withf(|ops| {
                ops.len() == 3
                    && ops[0].table == "orders"
                    && ops[1].table == "order_items"
                    && ops[1].sql.contains("order_id")
                    && ops[1].params.contains(&json!("row_fixed"))
            })
            .times(1)
            .returning(|ops| {
                Ok(vec![
                    WriteResult {
                        rows_affected: 1,
                        last_insert_rowid: 0
                    };
                    ops.len()
                ])
            });

        let service = service_with(store);
        let parent_id = service
            .create_with_line_items(
                NewRecord {
                    table: "orders".into(),
                    fields: fields(&[("status", json!("new"))]),
                },
                vec![
                    NewRecord {
                        table: "order_items".into(),
                        fields: fields(&[("sku", json!("A")), ("qty", json!(2))]),
                    },
                    NewRecord {
                        table: "order_items".into(),
                        fields: fields(&[("sku", json!("B")), ("qty", json!(1))]),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(parent_id, "row_fixed");
    }

    #[tokio::test]
    async fn health_check_reports_unhealthy_without_aborting() {
        let mut store = MockPartitionStore::new();
        store
            .expect_partition_names()
            .returning(|| vec!["ledger".to_string(), "commerce".to_string()]);
        store.expect_ping().returning(|partition| {
            if partition == "ledger" {
                Err(AppError::storage("ledger", "disk I/O error"))
            } else {
                Ok(())
            }
        });

        let service = service_with(store);
        let report = service.health_check().await;
        assert_eq!(report.len(), 2);
        assert!(matches!(
            report.get("ledger"),
            Some(PartitionHealth::Unhealthy { .. })
        ));
        assert_eq!(report.get("commerce"), Some(&PartitionHealth::Healthy));
    }

    #[tokio::test]
    async fn admin_ops_reject_unknown_partition() {
        let mut store = MockPartitionStore::new();
        store
            .expect_partition_names()
            .returning(|| vec!["ledger".to_string()]);

        let service = service_with(store);
        let result = service.reset_seeders("nope").await;
        assert!(matches!(
            result,
            Err(AppError::PartitionNotInitialized(_))
        ));
    }
}
