//! Layered configuration: built-in defaults, then an optional
//! `drive-reorganize.{toml,yaml,json,...}` file (or the file given with
//! `--config`), then `DRIVE_REORGANIZE__*` environment variables.

use crate::error::{Error, Result};
use crate::glacier::megabytes;
use crate::retry::RetryPolicy;
use config::{Config, ConfigError, Environment, File as ConfigFile, Map};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_NAME: &str = "drive-reorganize";
pub const ENV_PREFIX: &str = "DRIVE_REORGANIZE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub credentials_file: Option<PathBuf>,
    pub operation: OperationSettings,
    pub folder: FolderSettings,
    pub glacier: GlacierSettings,
    pub recover: RecoverSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Local mount of the drive
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationSettings {
    pub retry: u32,
    /// Seconds between attempts
    pub sleep_retry: u64,
    pub max_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderSettings {
    pub source: SourceFolder,
    pub destination: FolderRef,
    pub glacier: FolderRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceFolder {
    pub id: String,
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlacierSettings {
    pub max_zip_size_mb: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverSettings {
    pub list_file: PathBuf,
    pub output_dir: PathBuf,
}

/// What the run is going to do; decides which settings are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    List,
    Analyze,
    Reorganize,
    Recover,
    Glacier,
}

impl Settings {
    pub fn load(config_file: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        Self::load_with_env(config_file, None)
    }

    /// `env` replaces the process environment as the override source when given.
    pub fn load_with_env(
        config_file: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("store.root", ".")?
            .set_default("operation.retry", 3_i64)?
            .set_default("operation.sleep_retry", 10_i64)?
            .set_default("operation.max_threads", 4_i64)?
            .set_default("folder.source.id", "")?
            .set_default("folder.source.recursive", true)?
            .set_default("folder.destination.id", "")?
            .set_default("folder.glacier.id", "")?
            .set_default("glacier.max_zip_size_mb", 500_i64)?
            .set_default("recover.list_file", "torecover.txt")?
            .set_default("recover.output_dir", "recover")?;

        builder = match config_file {
            Some(path) => builder.add_source(ConfigFile::from(path).required(true)),
            None => builder.add_source(ConfigFile::with_name(CONFIG_NAME).required(false)),
        };

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize::<Settings>()
    }

    /// Fails on anything that would make `mode` unable to start.
    pub fn validate(&self, mode: Mode) -> Result<()> {
        if self.folder.source.id.trim().is_empty() {
            return Err(Error::Config("\"folder.source.id\" is not set".to_string()));
        }
        if mode == Mode::Reorganize && self.folder.destination.id.trim().is_empty() {
            return Err(Error::Config(
                "\"folder.destination.id\" is required to reorganize".to_string(),
            ));
        }
        if mode == Mode::Glacier && self.folder.glacier.id.trim().is_empty() {
            return Err(Error::Config("\"folder.glacier.id\" is required for glacier".to_string()));
        }
        if !self.store.root.is_dir() {
            return Err(Error::Config(format!(
                "store root {} is not a directory",
                self.store.root.display()
            )));
        }
        if let Some(credentials) = &self.credentials_file {
            if !credentials.is_file() {
                return Err(Error::Config(format!(
                    "credentials file {} not found",
                    credentials.display()
                )));
            }
        }
        if self.operation.max_threads == 0 {
            return Err(Error::Config("\"operation.max_threads\" must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.operation.retry, Duration::from_secs(self.operation.sleep_retry))
    }

    /// Zero when splitting is disabled.
    pub fn max_zip_bytes(&self) -> u64 {
        u64::try_from(self.glacier.max_zip_size_mb).map_or(0, megabytes)
    }

    pub fn log_effective(&self) {
        info!("store.root = {}", self.store.root.display());
        match &self.credentials_file {
            Some(path) => info!("credentials_file = {}", path.display()),
            None => info!("credentials_file = (none)"),
        }
        info!("operation.retry = {}", self.operation.retry);
        info!("operation.sleep_retry = {}s", self.operation.sleep_retry);
        info!("operation.max_threads = {}", self.operation.max_threads);
        info!("folder.source.id = {}", self.folder.source.id);
        info!("folder.source.recursive = {}", self.folder.source.recursive);
        info!("folder.destination.id = {}", self.folder.destination.id);
        info!("folder.glacier.id = {}", self.folder.glacier.id);
        info!("glacier.max_zip_size_mb = {}", self.glacier.max_zip_size_mb);
        info!("recover.list_file = {}", self.recover.list_file.display());
        info!("recover.output_dir = {}", self.recover.output_dir.display());
    }
}
