//! `kickcat.toml` and its merge with command line flags.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

use crate::Cli;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "kickcat.toml";
pub const DEFAULT_LOCAL_STORAGE: &str = ".kickcat";

/// Contents of a configuration file. Every field is optional; relative
/// paths are relative to the file's directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub local_storage: Option<PathBuf>,
    pub remote_storage: Option<PathBuf>,
    pub schemas: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Config {
    /// Reads `path`, or `kickcat.toml` when present. No file at all is an
    /// empty configuration; an explicit path that can't be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        match path.parent() {
            Some(base) if !base.as_os_str().is_empty() => Ok(config.relative_to(base)),
            _ => Ok(config),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn relative_to(self, base: &Path) -> Self {
        let rebase = |path: Option<PathBuf>| {
            path.map(|path| if path.is_relative() { base.join(path) } else { path })
        };
        Self {
            local_storage: rebase(self.local_storage),
            remote_storage: rebase(self.remote_storage),
            schemas: rebase(self.schemas),
            log_level: self.log_level,
        }
    }
}

/// Effective settings of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub local_storage: PathBuf,
    pub remote_storage: PathBuf,
    pub schemas: Option<PathBuf>,
    pub log_level: Level,
}

impl Settings {
    /// Flags win over the configuration file.
    pub fn resolve(cli: &Cli, config: Config) -> Result<Self> {
        let Some(remote_storage) = cli.remote_storage.clone().or(config.remote_storage) else {
            bail!("No remote storage configured: pass --remote-storage or set remote_storage in {DEFAULT_CONFIG_FILE}");
        };

        let log_level = if cli.verbose {
            Level::DEBUG
        } else {
            match config.log_level.as_deref() {
                Some(level) => Level::from_str(level)
                    .map_err(|_| anyhow::anyhow!("Unknown log level \"{level}\""))?,
                None => Level::INFO,
            }
        };

        Ok(Self {
            local_storage: cli
                .local_storage
                .clone()
                .or(config.local_storage)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORAGE)),
            remote_storage,
            schemas: cli.schemas.clone().or(config.schemas),
            log_level,
        })
    }
}
