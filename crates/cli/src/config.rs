// CLI Configuration Loading
// The static partition table plus module directories, from a TOML file.

use serde::Deserialize;

use shardbase_core::domain::{PartitionConfig, Registry};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub partitions: Vec<PartitionEntry>,
    pub migrations_dir: String,
    pub seeders_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct PartitionEntry {
    pub name: String,
    pub path: String,
    pub tables: Vec<String>,
    pub read_connections: Option<u32>,
}

const DEFAULT_READ_CONNECTIONS: u32 = 3;

pub fn load(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;
    Ok(settings.try_deserialize()?)
}

impl AppConfig {
    /// Registry with tilde-expanded database paths.
    pub fn registry(&self) -> Registry {
        Registry::new(
            self.partitions
                .iter()
                .map(|entry| PartitionConfig {
                    name: entry.name.clone(),
                    file_path: shellexpand::tilde(&entry.path).into_owned(),
                    tables: entry.tables.clone(),
                    read_connections: entry.read_connections.unwrap_or(DEFAULT_READ_CONNECTIONS),
                })
                .collect(),
        )
    }

    pub fn migrations_dir(&self) -> String {
        shellexpand::tilde(&self.migrations_dir).into_owned()
    }

    pub fn seeders_dir(&self) -> String {
        shellexpand::tilde(&self.seeders_dir).into_owned()
    }
}
