//! The end-to-end job: fetch CSVs, validate, optimize, store.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::error::{IngestError, OptimizeError, StoreError};
use crate::ingest::parse_documents;
use crate::optimizer::{OptimizationResult, RouteOptimizer};
use crate::traits::{DistanceModel, RecordSource, RouteSink};

/// A pipeline failure, tagged with the step it happened in.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("optimization failed: {0}")]
    Optimize(#[from] OptimizeError),

    #[error("storing results failed: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn step(&self) -> &'static str {
        match self {
            PipelineError::Ingest(_) => "ingest",
            PipelineError::Optimize(_) => "optimize",
            PipelineError::Store(_) => "store",
        }
    }
}

/// Counts for the log line and the CLI summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub documents: usize,
    pub records_accepted: usize,
    pub records_rejected: usize,
    pub routes: usize,
    pub failed_batches: usize,
    pub total_distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub summary: PipelineSummary,
    pub result: OptimizationResult,
}

/// Runs one pass of the pipeline.
///
/// Failed batches and rejected rows do not fail the run; they are stored
/// and counted. Only whole-step failures are returned as errors.
pub fn run_pipeline<M, S, K>(
    optimizer: &RouteOptimizer<M>,
    source: &S,
    sink: &mut K,
) -> Result<PipelineRun, PipelineError>
where
    M: DistanceModel,
    S: RecordSource + ?Sized,
    K: RouteSink + ?Sized,
{
    let documents = source.fetch()?;
    let parsed = parse_documents(&documents)?;
    let records_accepted = parsed.records.len();

    let result = optimizer.run(parsed.records, parsed.rejected)?;
    sink.store(&result)?;

    let summary = PipelineSummary {
        documents: documents.len(),
        records_accepted,
        records_rejected: result.rejected.len(),
        routes: result.routes.len(),
        failed_batches: result.failures.len(),
        total_distance_km: result.total_distance_km(),
    };
    info!(
        documents = summary.documents,
        records_accepted = summary.records_accepted,
        records_rejected = summary.records_rejected,
        routes = summary.routes,
        failed_batches = summary.failed_batches,
        total_distance_km = summary.total_distance_km,
        "pipeline finished"
    );
    Ok(PipelineRun { summary, result })
}
