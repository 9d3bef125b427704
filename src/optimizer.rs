//! Route optimizer facade: batching, parallel solving and result assembly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::batcher::{Batch, Batcher};
use crate::config::OptimizerConfig;
use crate::error::{BatchError, ConfigError, OptimizeError};
use crate::executor::{BatchExecutor, BatchFailure, CancellationToken};
use crate::graph::GraphBuilder;
use crate::haversine::Haversine;
use crate::record::{DeliveryRecord, RawDeliveryRecord, RecordRejection, validate_records};
use crate::route::Route;
use crate::solver::RouteSolver;
use crate::traits::DistanceModel;

/// Everything a run produced: routes, failed batches and rejected records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// One route per successful batch, ordered by batch id.
    pub routes: Vec<Route>,
    /// Batches that failed permanently, ordered by batch id.
    pub failures: Vec<BatchFailure>,
    /// Input records that never made it into a batch.
    pub rejected: Vec<RecordRejection>,
    pub computed_at: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn total_distance_km(&self) -> f64 {
        self.routes.iter().map(|route| route.total_distance_km).sum()
    }

    /// True when no batch failed and no record was rejected.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.rejected.is_empty()
    }
}

/// Orchestrates batching, graph building, solving and execution.
#[derive(Debug, Clone)]
pub struct RouteOptimizer<M = Haversine> {
    batcher: Batcher,
    executor: BatchExecutor,
    graphs: GraphBuilder<M>,
    solver: RouteSolver,
}

impl RouteOptimizer<Haversine> {
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        Self::with_distance_model(config, Haversine::default())
    }
}

impl<M: DistanceModel> RouteOptimizer<M> {
    /// Validates `config` up front; a bad configuration never reaches a batch.
    pub fn with_distance_model(config: OptimizerConfig, model: M) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            batcher: Batcher::new(config.batch_size)?,
            executor: BatchExecutor::new(config.concurrency, config.retry)?,
            graphs: GraphBuilder::new(model),
            solver: RouteSolver::new(config.solve),
        })
    }

    /// Shares `token` with the executor so another thread can stop the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(token);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.executor.cancellation_token()
    }

    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    /// Builds the graph for one batch and solves it.
    pub fn process_batch(&self, batch: &Batch, computed_at: DateTime<Utc>) -> Result<Route, BatchError> {
        let graph = self.graphs.build(batch)?;
        let route = self.solver.solve_route(graph, batch.id(), computed_at)?;
        info!(
            batch_id = batch.id(),
            rows = batch.len(),
            stops = route.len(),
            total_distance_km = route.total_distance_km,
            "completed batch optimization"
        );
        Ok(route)
    }

    /// Optimizes already-validated records.
    pub fn optimize(&self, records: Vec<DeliveryRecord>) -> Result<OptimizationResult, OptimizeError> {
        self.run(records, Vec::new())
    }

    /// Validates raw rows, then optimizes the ones that pass.
    ///
    /// Invalid rows are reported in [`OptimizationResult::rejected`] and do
    /// not stop the rest from being routed.
    pub fn optimize_raw(&self, raw: Vec<RawDeliveryRecord>) -> Result<OptimizationResult, OptimizeError> {
        let (records, rejected) = validate_records(raw);
        self.run(records, rejected)
    }

    /// Optimizes `records`, carrying along rejections from earlier
    /// validation.
    pub fn run(
        &self,
        records: Vec<DeliveryRecord>,
        rejected: Vec<RecordRejection>,
    ) -> Result<OptimizationResult, OptimizeError> {
        if !rejected.is_empty() {
            warn!(rejected = rejected.len(), "records failed validation and were skipped");
        }

        let computed_at = Utc::now();
        let total_rows = records.len();
        let batches = self.batcher.split(records);
        info!(
            total_rows,
            batches = batches.len(),
            batch_size = self.batcher.batch_size(),
            "starting route optimization"
        );

        let report = self
            .executor
            .execute(batches, |batch| self.process_batch(batch, computed_at))?;

        let result = OptimizationResult {
            routes: report.routes,
            failures: report.failures,
            rejected,
            computed_at,
        };
        info!(
            routes = result.routes.len(),
            failed_batches = result.failures.len(),
            total_distance_km = result.total_distance_km(),
            "route optimization completed"
        );
        Ok(result)
    }
}
