//! Error types for the planner.
//!
//! Each concern gets its own enum so callers can tell a bad record from a
//! failed batch from a broken configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::polyline::WktError;
use crate::record::DeliveryId;

/// A value failed validation. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} value {value} is out of range or not finite")]
    InvalidCoordinate { field: &'static str, value: f64 },

    #[error("timestamp {0:?} is not a valid date-time")]
    InvalidTimestamp(String),

    #[error("delivery_id {0} appears more than once")]
    DuplicateDeliveryId(DeliveryId),

    #[error("batch size must be a positive integer, got {0}")]
    InvalidBatchSize(usize),

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// The solver was handed something the batcher should never produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("cannot solve a graph with zero nodes")]
    EmptyGraph,
}

/// Failure of one attempt at processing a batch.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// Resource exhaustion or interrupted work; worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid batch input: {0}")]
    Validation(#[from] ValidationError),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl BatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BatchError::Transient(_))
    }
}

impl From<SolveError> for BatchError {
    fn from(err: SolveError) -> Self {
        BatchError::Internal(err.to_string())
    }
}

/// Invalid configuration. Aborts a run before any batch executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Run-level failure of the optimizer itself (not of a single batch).
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure to obtain delivery records from a record source.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("CSV data in {origin} is empty or lacks a header")]
    EmptyInput { origin: String },

    #[error("CSV schema mismatch in {origin}: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        origin: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("failed to read CSV from {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no usable CSV data found in {location}")]
    NoData { location: String },

    #[error("invalid source configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Failure to persist an optimization result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("invalid store configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode route column: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stored geometry is not valid WKT: {0}")]
    Geometry(#[from] WktError),
}
