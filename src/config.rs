//! Configuration for the optimizer and the pipeline around it.
//!
//! [`OptimizerConfig`] is all the engine needs. [`Settings`] adds the record
//! source, result store and logging, and is layered as: built-in defaults,
//! then an optional TOML file, then environment variables. CLI flags are
//! applied last by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batcher::DEFAULT_BATCH_SIZE;
use crate::error::{ConfigError, ValidationError};
use crate::retry::RetryPolicy;
use crate::solver::SolveOptions;

/// Engine parameters. Immutable once handed to the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub batch_size: usize,
    /// Worker threads solving batches at the same time.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub solve: SolveOptions,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            solve: SolveOptions::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize(self.batch_size).into());
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        self.retry.validate()
    }
}

/// One worker per processing unit, leaving one for the coordinating thread.
pub fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Where raw delivery CSVs live in the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// `host:port` of the S3-compatible endpoint.
    pub endpoint: String,
    pub bucket: String,
    pub secure: bool,
    /// Tried first; small sample extract.
    pub sample_key: String,
    /// Listed for `.csv` objects when the sample is absent.
    pub prefix: String,
    /// Explicit full-dataset objects. When non-empty, these are read
    /// instead of listing `prefix`.
    pub keys: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9000".to_string(),
            bucket: "logistics-data".to_string(),
            secure: false,
            sample_key: "raw/sample_deliveries.csv".to_string(),
            prefix: "raw/".to_string(),
            keys: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl SourceSettings {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("store/logistics.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    /// Append log lines here instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
        }
    }
}

/// Full application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub optimizer: OptimizerConfig,
    pub source: SourceSettings,
    pub store: StoreSettings,
    pub logging: LogSettings,
}

impl Settings {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded settings file");
        Ok(settings)
    }

    /// Overrides fields from environment-style variables.
    ///
    /// Empty values are ignored; unparsable numbers are an error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("BATCH_SIZE") {
            self.optimizer.batch_size = parse_number("BATCH_SIZE", &value)?;
        }
        if let Some(value) = var("CONCURRENCY") {
            self.optimizer.concurrency = parse_number("CONCURRENCY", &value)?;
        }
        if let Some(value) = var("MINIO_ENDPOINT") {
            self.source.endpoint = value;
        }
        if let Some(value) = var("MINIO_BUCKET") {
            self.source.bucket = value;
        }
        if let Some(value) = var("MINIO_SECURE") {
            self.source.secure = matches!(value.to_lowercase().as_str(), "true" | "1" | "t");
        }
        if let Some(value) = var("DB_PATH") {
            self.store.db_path = PathBuf::from(value);
        }
        if let Some(value) = var("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.endpoint.trim().is_empty() {
            return Err(ConfigError::Empty { field: "source.endpoint" });
        }
        if self.source.bucket.trim().is_empty() {
            return Err(ConfigError::Empty { field: "source.bucket" });
        }
        if self.store.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Empty { field: "store.db_path" });
        }
        if self.logging.file.as_ref().is_some_and(|file| file.as_os_str().is_empty()) {
            return Err(ConfigError::Empty { field: "logging.file" });
        }
        self.optimizer.validate()
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("expected a positive integer, got {value:?}"),
    })
}
