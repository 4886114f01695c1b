//! Shardbase - partitioned SQLite data service
//! Administrative command-line surface over the Data Service contract.

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shardbase_core::application::{
    BootstrapOutcome, DataService, MigrationTracker, PartitionHealth, SeedTracker,
};
use shardbase_core::domain::SchemaCatalog;
use shardbase_core::port::{
    PartitionStore, SystemTimeProvider, TimeProvider, UuidProvider,
};
use shardbase_infra_sqlite::SqlitePartitionManager;

#[derive(Parser)]
#[command(name = "shardbase", version, about = "Partitioned SQLite data service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "shardbase.toml", env = "SHARDBASE_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create baseline tables on every partition
    Bootstrap,
    /// Validate the partition registry against the schema catalog
    Validate,
    /// Schema migration administration
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Seeder administration
    Seed {
        #[command(subcommand)]
        action: SeedAction,
    },
    /// Probe every partition
    Health,
    /// Reclaim space with VACUUM
    Vacuum {
        #[arg(long)]
        partition: Option<String>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply pending migrations
    Run {
        #[arg(long)]
        partition: Option<String>,
    },
    /// Undo the most recently applied migration on a partition
    Rollback { partition: String },
    /// Show per-partition migration status
    Status,
}

#[derive(Subcommand)]
enum SeedAction {
    /// Run pending seeders
    Run {
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Clear seed bookkeeping (seeded data is untouched)
    Reset { partition: String },
    /// Reset bookkeeping, then rerun every applicable seeder
    Refresh { partition: String },
    /// Show per-partition seeder status
    Status,
}

#[derive(Tabled)]
struct StatusRow {
    partition: String,
    applied: usize,
    pending: usize,
    total: usize,
    #[tabled(rename = "last applied")]
    last_applied: String,
}

fn init_logging() {
    let log_format =
        std::env::var("SHARDBASE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = config::load(&cli.config)?;
    let catalog = Arc::new(SchemaCatalog::stock()?);
    let registry = cfg.registry();
    registry.validate(&catalog)?;

    if matches!(cli.command, Command::Validate) {
        println!(
            "{} {} partitions, {} tables",
            "Configuration OK:".green(),
            registry.partitions.len(),
            catalog.table_names().len()
        );
        return Ok(());
    }

    info!(config = %cli.config, "Opening partitions");
    let store: Arc<dyn PartitionStore> = Arc::new(SqlitePartitionManager::open(registry).await?);
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let migrations = MigrationTracker::new(
        store.clone(),
        cfg.migrations_dir(),
        time_provider.clone(),
    );
    let seeders = SeedTracker::new(store.clone(), cfg.seeders_dir(), time_provider.clone());
    let service = DataService::new(
        store,
        catalog,
        migrations,
        seeders,
        Arc::new(UuidProvider),
        time_provider,
    );

    let outcome = run_command(&service, cli.command).await;
    service.close().await;
    outcome
}

async fn run_command(service: &DataService, command: Command) -> Result<()> {
    match command {
        Command::Validate => Ok(()), // handled before pools open
        Command::Bootstrap => {
            let report = service.bootstrap_schema().await;
            let mut failed = false;
            for (partition, outcome) in report {
                match outcome {
                    BootstrapOutcome::Ready => {
                        println!("{partition}: {}", "ready".green());
                    }
                    BootstrapOutcome::Failed { message } => {
                        failed = true;
                        println!("{partition}: {} {message}", "failed".red());
                    }
                }
            }
            if failed {
                anyhow::bail!("Bootstrap failed on at least one partition");
            }
            Ok(())
        }
        Command::Migrate { action } => match action {
            MigrateAction::Run { partition } => {
                let results = service.run_migrations(partition.as_deref()).await?;
                for (partition, records) in results {
                    if records.is_empty() {
                        println!("{partition}: up to date");
                    } else {
                        for record in records {
                            println!("{partition}: applied {}", record.name.green());
                        }
                    }
                }
                Ok(())
            }
            MigrateAction::Rollback { partition } => {
                match service.rollback_migration(&partition).await? {
                    Some(record) => {
                        println!("{partition}: rolled back {}", record.name.yellow())
                    }
                    None => println!("{partition}: nothing to roll back"),
                }
                Ok(())
            }
            MigrateAction::Status => {
                let statuses = service.migration_status().await?;
                let rows: Vec<StatusRow> = statuses
                    .into_iter()
                    .map(|s| StatusRow {
                        partition: s.partition,
                        applied: s.applied_count,
                        pending: s.pending_count,
                        total: s.total_count,
                        last_applied: s.last_applied.unwrap_or_else(|| "-".to_string()),
                    })
                    .collect();
                println!("{}", Table::new(rows));
                Ok(())
            }
        },
        Command::Seed { action } => match action {
            SeedAction::Run { partition, name } => {
                let results = service
                    .run_seeders(partition.as_deref(), name.as_deref())
                    .await?;
                for (partition, records) in results {
                    if records.is_empty() {
                        println!("{partition}: nothing to seed");
                    } else {
                        for record in records {
                            println!("{partition}: seeded {}", record.name.green());
                        }
                    }
                }
                Ok(())
            }
            SeedAction::Reset { partition } => {
                let cleared = service.reset_seeders(&partition).await?;
                println!("{partition}: cleared {cleared} seed records");
                Ok(())
            }
            SeedAction::Refresh { partition } => {
                let records = service.refresh_seeders(&partition).await?;
                println!("{partition}: reseeded {} modules", records.len());
                Ok(())
            }
            SeedAction::Status => {
                let statuses = service.seeder_status().await?;
                let rows: Vec<StatusRow> = statuses
                    .into_iter()
                    .map(|s| StatusRow {
                        partition: s.partition,
                        applied: s.applied_count,
                        pending: s.pending_count,
                        total: s.total_count,
                        last_applied: s.last_applied.unwrap_or_else(|| "-".to_string()),
                    })
                    .collect();
                println!("{}", Table::new(rows));
                Ok(())
            }
        },
        Command::Health => {
            let report = service.health_check().await;
            let mut unhealthy = false;
            for (partition, health) in report {
                match health {
                    PartitionHealth::Healthy => {
                        println!("{partition}: {}", "healthy".green())
                    }
                    PartitionHealth::Unhealthy { message } => {
                        unhealthy = true;
                        println!("{partition}: {} {message}", "unhealthy".red());
                    }
                }
            }
            if unhealthy {
                anyhow::bail!("At least one partition is unhealthy");
            }
            Ok(())
        }
        Command::Vacuum { partition } => {
            let results = service.vacuum(partition.as_deref()).await?;
            for (partition, reclaimed) in results {
                println!("{partition}: reclaimed {reclaimed:.2} MiB");
            }
            Ok(())
        }
    }
}
