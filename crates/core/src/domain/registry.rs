// Partition Registry
// Static table -> partition mapping. Built once from configuration at
// startup, immutable thereafter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::schema::SchemaCatalog;
use crate::error::{AppError, Result};

/// Partition identifier
pub type PartitionName = String;

/// Static configuration for one partition: its backing file, the tables it
/// owns and the size of its read connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: PartitionName,
    pub file_path: String,
    pub tables: Vec<String>,
    #[serde(default = "default_read_connections")]
    pub read_connections: u32,
}

fn default_read_connections() -> u32 {
    3
}

/// Ordered set of partition configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub partitions: Vec<PartitionConfig>,
}

impl Registry {
    pub fn new(partitions: Vec<PartitionConfig>) -> Self {
        Self { partitions }
    }

    /// Resolve a table to its owning partition. Exact lookup, no fallback.
    pub fn resolve(&self, table: &str) -> Result<&PartitionConfig> {
        self.partitions
            .iter()
            .find(|p| p.tables.iter().any(|t| t == table))
            .ok_or_else(|| AppError::UnknownTable(table.to_string()))
    }

    pub fn partition(&self, name: &str) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn partition_names(&self) -> Vec<PartitionName> {
        self.partitions.iter().map(|p| p.name.clone()).collect()
    }

    /// Flat table -> partition routing map.
    pub fn routing(&self) -> HashMap<String, PartitionName> {
        let mut routing = HashMap::new();
        for partition in &self.partitions {
            for table in &partition.tables {
                routing.insert(table.clone(), partition.name.clone());
            }
        }
        routing
    }

    /// Validate against the schema catalog:
    /// - partition names are unique, every pool has at least one reader
    /// - table ownership is disjoint and covers every catalog table
    /// - no partition owns a table the catalog does not know
    /// - parent/child tables are co-located (the invariant grouped writes
    ///   depend on, checked here rather than assumed at write time)
    pub fn validate(&self, catalog: &SchemaCatalog) -> Result<()> {
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for partition in &self.partitions {
            if self
                .partitions
                .iter()
                .filter(|p| p.name == partition.name)
                .count()
                > 1
            {
                return Err(AppError::Config(format!(
                    "Duplicate partition name: {}",
                    partition.name
                )));
            }
            if partition.read_connections == 0 {
                return Err(AppError::Config(format!(
                    "Partition {} has zero read connections",
                    partition.name
                )));
            }

            for table in &partition.tables {
                if let Some(previous) = owners.insert(table, &partition.name) {
                    return Err(AppError::Config(format!(
                        "Table {} owned by partitions {} and {}",
                        table, previous, partition.name
                    )));
                }
                if catalog.get(table).is_none() {
                    return Err(AppError::Config(format!(
                        "Partition {} owns table {} which is not in the schema catalog",
                        partition.name, table
                    )));
                }
            }
        }

        for table in catalog.table_names() {
            if !owners.contains_key(table) {
                return Err(AppError::Config(format!(
                    "Table {table} is not owned by any partition"
                )));
            }
        }

        for schema in catalog.tables() {
            if let Some(parent) = &schema.parent {
                let child_partition = self.resolve(&schema.name)?.name.clone();
                let parent_partition = self.resolve(parent)?.name.clone();
                if child_partition != parent_partition {
                    return Err(AppError::Config(format!(
                        "Table {} (partition {}) must share a partition with its parent {} (partition {})",
                        schema.name, child_partition, parent, parent_partition
                    )));
                }
            }
        }

        Ok(())
    }
}
