// Seed Tracker
// Same shape as the Migration Tracker but keyed by seeder name, with
// reset (clear the bookkeeping) and refresh (reset + reapply). Resetting
// never touches the rows the seeders wrote.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::domain::source::{split_statements, SeederModule};
use crate::error::{AppError, Result};
use crate::port::{PartitionStore, TimeProvider};

/// Bookkeeping table, created lazily on each partition.
pub const SEEDERS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS seeders (name TEXT PRIMARY KEY, executed_at INTEGER NOT NULL)";

/// One applied seeder, as recorded in a partition's bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub name: String,
    pub executed_at: i64,
}

/// Per-partition seeder status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeederStatus {
    pub partition: String,
    pub applied_count: usize,
    pub pending_count: usize,
    pub total_count: usize,
    pub last_applied: Option<String>,
}

pub struct SeedTracker {
    store: Arc<dyn PartitionStore>,
    source_dir: PathBuf,
    time_provider: Arc<dyn TimeProvider>,
}

impl SeedTracker {
    pub fn new(
        store: Arc<dyn PartitionStore>,
        source_dir: impl Into<PathBuf>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            source_dir: source_dir.into(),
            time_provider,
        }
    }

    /// Scan the source directory for seeder modules, sorted lexically by
    /// filename. Names are unique by construction (one file, one name).
    pub fn discover(&self) -> Result<Vec<SeederModule>> {
        let mut files = sql_files(&self.source_dir)?;
        files.sort();

        let mut modules = Vec::with_capacity(files.len());
        for file_name in files {
            let content = fs::read_to_string(self.source_dir.join(&file_name))?;
            modules.push(SeederModule::parse(&file_name, &content)?);
        }
        Ok(modules)
    }

    /// Applied seeders for a partition, ordered by application time.
    pub async fn applied(&self, partition: &str) -> Result<Vec<SeedRecord>> {
        self.ensure_tracking_table(partition).await?;
        let rows = self
            .store
            .query_on_partition(
                partition,
                "SELECT name, executed_at FROM seeders ORDER BY executed_at ASC, name ASC",
                vec![],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row)).map_err(AppError::Serialization)
            })
            .collect()
    }

    /// Run pending seeders in discovery order, optionally filtered to a
    /// single name. An already-applied seeder is a logged no-op. Stops
    /// and propagates on the first failure.
    #[instrument(skip(self))]
    pub async fn run_pending(
        &self,
        partition: &str,
        only: Option<&str>,
    ) -> Result<Vec<SeedRecord>> {
        let modules = self.discover()?;
        if let Some(name) = only {
            if !modules.iter().any(|m| m.name == name) {
                return Err(AppError::NotFound(format!(
                    "Seeder {} not found in {}",
                    name,
                    self.source_dir.display()
                )));
            }
        }

        let applied: HashSet<String> = self
            .applied(partition)
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();

        let mut newly_applied = Vec::new();
        for module in modules {
            if let Some(name) = only {
                if module.name != name {
                    continue;
                }
            }
            if applied.contains(&module.name) {
                info!(partition, seeder = %module.name, "Seeder already applied, skipping");
                continue;
            }
            if !module.applies_to(partition) {
                info!(
                    partition,
                    seeder = %module.name,
                    "Seeder restricted to other partitions, skipping"
                );
                continue;
            }
            let record = self.apply(partition, &module).await?;
            newly_applied.push(record);
        }

        info!(partition, applied = newly_applied.len(), "Pending seeders applied");
        Ok(newly_applied)
    }

    /// Delete every seed record for the partition. Bookkeeping only; the
    /// rows seeders wrote stay where they are. Returns the number of
    /// records cleared.
    #[instrument(skip(self))]
    pub async fn reset(&self, partition: &str) -> Result<u64> {
        self.ensure_tracking_table(partition).await?;
        let result = self
            .store
            .execute_on_partition(partition, "DELETE FROM seeders", vec![])
            .await?;
        info!(partition, cleared = result.rows_affected, "Seed records reset");
        Ok(result.rows_affected)
    }

    /// Reset, then reapply every applicable seeder.
    #[instrument(skip(self))]
    pub async fn refresh(&self, partition: &str) -> Result<Vec<SeedRecord>> {
        self.reset(partition).await?;
        self.run_pending(partition, None).await
    }

    pub async fn status(&self, partition: &str) -> Result<SeederStatus> {
        let applicable: Vec<SeederModule> = self
            .discover()?
            .into_iter()
            .filter(|m| m.applies_to(partition))
            .collect();
        let applied = self.applied(partition).await?;
        let applied_names: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();

        let pending_count = applicable
            .iter()
            .filter(|m| !applied_names.contains(m.name.as_str()))
            .count();

        Ok(SeederStatus {
            partition: partition.to_string(),
            applied_count: applied.len(),
            pending_count,
            total_count: applicable.len(),
            last_applied: applied.last().map(|r| r.name.clone()),
        })
    }

    async fn ensure_tracking_table(&self, partition: &str) -> Result<()> {
        self.store
            .execute_on_partition(partition, SEEDERS_TABLE_SQL, vec![])
            .await?;
        Ok(())
    }

    async fn apply(&self, partition: &str, module: &SeederModule) -> Result<SeedRecord> {
        info!(partition, seeder = %module.name, "Running seeder");
        self.store
            .execute_batch_on_partition(partition, split_statements(&module.sql))
            .await
            .map_err(|e| AppError::seed(partition, &module.name, e))?;

        let executed_at = self.time_provider.now_millis();
        self.store
            .execute_on_partition(
                partition,
                "INSERT INTO seeders (name, executed_at) VALUES (?, ?)",
                vec![json!(module.name), json!(executed_at)],
            )
            .await
            .map_err(|e| AppError::seed(partition, &module.name, e))?;

        Ok(SeedRecord {
            name: module.name.clone(),
            executed_at,
        })
    }
}

fn sql_files(dir: &PathBuf) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!(
            "Module directory does not exist: {}",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".sql") {
            files.push(name);
        }
    }
    Ok(files)
}
