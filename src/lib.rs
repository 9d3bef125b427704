//! batch-route-planner
//!
//! Turns large sets of delivery records into one optimized visiting order
//! per batch. Records are validated and split into fixed-size batches. Each
//! batch becomes a complete great-circle distance graph and is solved
//! independently with nearest-neighbor construction plus 2-opt refinement.
//! Batches run in parallel on a bounded worker pool, and failures are
//! retried and isolated per batch.
//!
//! The surrounding pipeline fetches CSVs from an S3-compatible store or
//! local files and writes routes to SQLite.

pub mod batcher;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod haversine;
pub mod ingest;
pub mod logging;
pub mod optimizer;
pub mod pipeline;
pub mod polyline;
pub mod record;
pub mod retry;
pub mod route;
pub mod solver;
pub mod source;
pub mod store;
pub mod traits;

pub use config::{OptimizerConfig, Settings};
pub use error::{BatchError, ConfigError, IngestError, OptimizeError, StoreError, ValidationError};
pub use optimizer::{OptimizationResult, RouteOptimizer};
pub use record::{Coordinate, DeliveryId, DeliveryRecord, RawDeliveryRecord};
pub use route::Route;
