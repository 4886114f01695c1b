// Migration Tracker
// Per-partition append-only log of applied schema migration versions.
// Modules are discovered from a directory; only the tail of the log can
// be undone.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::domain::source::{split_statements, MigrationModule};
use crate::error::{AppError, Result};
use crate::port::{PartitionStore, TimeProvider};

/// Bookkeeping table, created lazily on each partition.
pub const MIGRATIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS migrations (version TEXT PRIMARY KEY, name TEXT NOT NULL, executed_at INTEGER NOT NULL)";

/// One applied migration, as recorded in a partition's bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: String,
    pub name: String,
    pub executed_at: i64,
}

/// Per-partition migration status, computed over the modules applicable
/// to that partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub partition: String,
    pub applied_count: usize,
    pub pending_count: usize,
    pub total_count: usize,
    pub last_applied: Option<String>,
}

pub struct MigrationTracker {
    store: Arc<dyn PartitionStore>,
    source_dir: PathBuf,
    time_provider: Arc<dyn TimeProvider>,
}

impl MigrationTracker {
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

    /// Scan the source directory for migration modules, sorted lexically
    /// by filename. Duplicate versions are a configuration error.
    pub fn discover(&self) -> Result<Vec<MigrationModule>> {
        let mut files = sql_files(&self.source_dir)?;
        files.sort();

        let mut modules = Vec::with_capacity(files.len());
        let mut versions = HashSet::new();
        for file_name in files {
            let content = fs::read_to_string(self.source_dir.join(&file_name))?;
            let module = MigrationModule::parse(&file_name, &content)?;
            if !versions.insert(module.version.clone()) {
                return Err(AppError::Config(format!(
                    "Duplicate migration version {} in {}",
                    module.version,
                    self.source_dir.display()
                )));
            }
            modules.push(module);
        }
        Ok(modules)
    }

    /// Applied migrations for a partition, ordered by application time.
    pub async fn applied(&self, partition: &str) -> Result<Vec<MigrationRecord>> {
        self.ensure_tracking_table(partition).await?;
        let rows = self
            .store
            .query_on_partition(
                partition,
                "SELECT version, name, executed_at FROM migrations ORDER BY executed_at ASC, version ASC",
                vec![],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row)).map_err(AppError::Serialization)
            })
            .collect()
    }

    /// Apply every pending migration in discovery order. Stops and
    /// propagates on the first failure; migrations applied earlier in the
    /// same call stay applied.
    #[instrument(skip(self))]
    pub async fn run_pending(&self, partition: &str) -> Result<Vec<MigrationRecord>> {
        let modules = self.discover()?;
        let applied: HashSet<String> = self
            .applied(partition)
            .await?
            .into_iter()
            .map(|record| record.version)
            .collect();

        let mut newly_applied = Vec::new();
        for module in modules {
            if applied.contains(&module.version) {
                continue;
            }
            if !module.applies_to(partition) {
                info!(
                    partition,
                    module = %module.name,
                    "Migration restricted to other partitions, skipping"
                );
                continue;
            }
            let record = self.apply(partition, &module).await?;
            newly_applied.push(record);
        }

        info!(
            partition,
            applied = newly_applied.len(),
            "Pending migrations applied"
        );
        Ok(newly_applied)
    }

    /// Undo the most recently applied migration. `Ok(None)` is the
    /// explicit "nothing applied" signal.
    #[instrument(skip(self))]
    pub async fn rollback_last(&self, partition: &str) -> Result<Option<MigrationRecord>> {
        let applied = self.applied(partition).await?;
        let Some(last) = applied.last().cloned() else {
            info!(partition, "No applied migrations to roll back");
            return Ok(None);
        };

        let modules = self.discover()?;
        let module = modules
            .iter()
            .find(|m| m.version == last.version)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Migration module for applied version {} not found in {}",
                    last.version,
                    self.source_dir.display()
                ))
            })?;
        let down = module.down.as_ref().ok_or_else(|| {
            AppError::Validation(format!("Migration {} has no down script", module.name))
        })?;

        self.store
            .execute_batch_on_partition(partition, split_statements(down))
            .await
            .map_err(|e| AppError::migration(partition, &module.name, e))?;
        self.store
            .execute_on_partition(
                partition,
                "DELETE FROM migrations WHERE version = ?",
                vec![json!(last.version)],
            )
            .await?;

        info!(partition, version = %last.version, "Migration rolled back");
        Ok(Some(last))
    }

    pub async fn status(&self, partition: &str) -> Result<MigrationStatus> {
        let applicable: Vec<MigrationModule> = self
            .discover()?
            .into_iter()
            .filter(|m| m.applies_to(partition))
            .collect();
        let applied = self.applied(partition).await?;
        let applied_versions: HashSet<&str> =
            applied.iter().map(|r| r.version.as_str()).collect();

        let pending_count = applicable
            .iter()
            .filter(|m| !applied_versions.contains(m.version.as_str()))
            .count();

        Ok(MigrationStatus {
            partition: partition.to_string(),
            applied_count: applied.len(),
            pending_count,
            total_count: applicable.len(),
            last_applied: applied.last().map(|r| r.name.clone()),
        })
    }

    async fn ensure_tracking_table(&self, partition: &str) -> Result<()> {
        self.store
            .execute_on_partition(partition, MIGRATIONS_TABLE_SQL, vec![])
            .await?;
        Ok(())
    }

    async fn apply(&self, partition: &str, module: &MigrationModule) -> Result<MigrationRecord> {
        info!(partition, version = %module.version, "Applying migration");
        self.store
            .execute_batch_on_partition(partition, split_statements(&module.up))
            .await
            .map_err(|e| AppError::migration(partition, &module.name, e))?;

        // Recorded only after the up step succeeded; a throwing step is
        // never marked applied.
        let executed_at = self.time_provider.now_millis();
        self.store
            .execute_on_partition(
                partition,
                "INSERT INTO migrations (version, name, executed_at) VALUES (?, ?, ?)",
                vec![
                    json!(module.version),
                    json!(module.name),
                    json!(executed_at),
                ],
            )
            .await
            .map_err(|e| AppError::migration(partition, &module.name, e))?;

        Ok(MigrationRecord {
            version: module.version.clone(),
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
