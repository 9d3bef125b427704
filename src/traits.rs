//! Core domain traits for the batch planner.
//!
//! These are the seams where the engine meets the outside world: how
//! distances are measured, where records come from and where routes go.

use crate::error::{IngestError, StoreError, ValidationError};
use crate::optimizer::OptimizationResult;
use crate::record::Coordinate;

/// Measures the distance between two coordinates, in kilometers.
///
/// Implementations must be pure: symmetric, non-negative, zero for equal
/// coordinates, and rejecting coordinates outside the valid ranges.
pub trait DistanceModel: Send + Sync {
    fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, ValidationError>;
}

/// One CSV document as delivered by a record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDocument {
    /// Where the document came from (object key or file path), for logs.
    pub origin: String,
    pub contents: String,
}

/// Supplies raw delivery data.
pub trait RecordSource {
    fn fetch(&self) -> Result<Vec<CsvDocument>, IngestError>;
}

/// Persists optimized routes.
pub trait RouteSink {
    fn store(&mut self, result: &OptimizationResult) -> Result<(), StoreError>;
}
