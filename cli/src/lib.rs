//! Command line front end of KickCat.
//!
//! Both storages are directories handled by
//! [`FileStorage`](kickcat_storage::FileStorage); the remote one assigns
//! primary keys, like an issue tracker would.

mod config;

pub use config::{Config, DEFAULT_CONFIG_FILE, DEFAULT_LOCAL_STORAGE, Settings};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kickcat_model::{EntitySchemaRegistry, EntityType};
use kickcat_storage::{FileStorage, FileStorageConfig};
use kickcat_sync::{PushOptions, SyncEngine};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kickcat", version)]
#[command(about = "Sync issues, labels and milestones between a local and a remote storage")]
pub struct Cli {
    /// Configuration file (default: ./kickcat.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Local storage directory
    #[arg(long, global = true)]
    pub local_storage: Option<PathBuf>,

    /// Remote storage directory
    #[arg(long, global = true)]
    pub remote_storage: Option<PathBuf>,

    /// Directory with <type>.schema.json files overriding the built-in ones
    #[arg(long, global = true)]
    pub schemas: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Copy one remote entity into the local storage
    Pull {
        #[arg(long)]
        of: EntityType,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Copy every remote entity into the local storage
    PullAll {
        #[arg(long)]
        of: Option<EntityType>,
    },
    /// Send local changes to the remote storage
    PushAll {
        #[arg(long)]
        of: Option<EntityType>,
        /// Compare every entity, not only those changed since the last sync
        #[arg(long)]
        force: bool,
        /// Keep references to entities found obsolete
        #[arg(long)]
        no_repair: bool,
    },
    /// Delete one local entity and the references to it
    Delete {
        #[arg(long)]
        of: EntityType,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        /// Keep references to the deleted entity
        #[arg(long)]
        no_repair: bool,
    },
    /// Rewrite the local storage files, dropping records that can't be read
    Repair,
}

/// `RUST_LOG` directives when given and valid, otherwise `level` for
/// everything.
pub fn log_filter(level: Level, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()))
}

/// A value given on the command line: integers are numbers, anything else
/// is a string.
pub fn parse_value(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::String(raw.to_string()),
    }
}

pub fn load_schemas(dir: Option<&Path>) -> Result<EntitySchemaRegistry> {
    match dir {
        Some(dir) => EntitySchemaRegistry::builtin_with_overrides(dir)
            .with_context(|| format!("Failed to load schemas from {}", dir.display())),
        None => EntitySchemaRegistry::builtin().context("Failed to load built-in schemas"),
    }
}

/// Runs one command and returns a one-line summary of what it did.
pub async fn run(command: &Command, settings: &Settings) -> Result<String> {
    let schemas = Arc::new(load_schemas(settings.schemas.as_deref())?);
    let local = FileStorage::new(
        FileStorageConfig::new(settings.local_storage.clone()),
        schemas.clone(),
    );
    let remote = FileStorage::new(
        FileStorageConfig {
            assign_primary_keys: true,
            ..FileStorageConfig::new(settings.remote_storage.clone())
        },
        schemas,
    );
    let mut engine = SyncEngine::new(local, remote);

    match command {
        Command::Pull { of, key, value } => {
            engine
                .pull(*of, key, &parse_value(value))
                .await
                .with_context(|| format!("Failed to pull {of} with {key} equal to {value}"))?;
            Ok(format!("Pulled {of} {key}={value}"))
        }
        Command::PullAll { of } => {
            let pulled = engine.pull_all(*of).await.context("Failed to pull")?;
            Ok(format!("Pulled {pulled} entities"))
        }
        Command::PushAll {
            of,
            force,
            no_repair,
        } => {
            let options = PushOptions {
                of: *of,
                force: *force,
                repair: !no_repair,
            };
            let report = engine.push_all(&options).await.context("Failed to push")?;
            Ok(format!("Pushed: {report}"))
        }
        Command::Delete {
            of,
            key,
            value,
            no_repair,
        } => {
            let found = engine
                .delete(*of, key, &parse_value(value), !no_repair)
                .await
                .with_context(|| format!("Failed to delete {of} with {key} equal to {value}"))?;
            if found {
                Ok(format!("Deleted {of} {key}={value}"))
            } else {
                Ok(format!("No {of} with {key} equal to {value}"))
            }
        }
        Command::Repair => {
            let local = engine.local_mut();
            let written = local
                .rewrite_all()
                .await
                .context("Failed to repair the local storage")?;
            Ok(format!(
                "Rewrote {written} records, dropped {} unreadable ones",
                local.skipped()
            ))
        }
    }
}
