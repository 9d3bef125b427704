//! Parallel batch execution with per-batch retry and failure isolation.
//!
//! Each batch is an independent unit of work on a bounded rayon pool.
//! Results are collected in batch order no matter which worker finishes
//! first, and a batch either yields a complete route or a recorded failure.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batcher::Batch;
use crate::error::{BatchError, ConfigError, OptimizeError};
use crate::retry::RetryPolicy;
use crate::route::Route;

/// Granularity at which backoff sleeps notice cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Shared flag that stops new batch attempts from starting.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` if the
    /// sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

/// Why a batch ended up without a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient errors on every allowed attempt.
    RetriesExhausted,
    Validation,
    Internal,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Validation => "validation",
            FailureKind::Internal => "internal",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// A batch that permanently failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch_id: usize,
    pub kind: FailureKind,
    pub reason: String,
    /// Attempts actually started.
    pub attempts: u32,
}

impl BatchFailure {
    fn from_error(batch_id: usize, attempts: u32, err: &BatchError) -> Self {
        let kind = match err {
            BatchError::Transient(_) => FailureKind::RetriesExhausted,
            BatchError::Validation(_) => FailureKind::Validation,
            BatchError::Internal(_) => FailureKind::Internal,
        };
        Self {
            batch_id,
            kind,
            reason: err.to_string(),
            attempts,
        }
    }

    fn cancelled(batch_id: usize, attempts: u32) -> Self {
        Self {
            batch_id,
            kind: FailureKind::Cancelled,
            reason: "cancelled".to_string(),
            attempts,
        }
    }
}

/// Routes and failures from one execution, both ordered by batch id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub routes: Vec<Route>,
    pub failures: Vec<BatchFailure>,
}

/// Runs batches concurrently up to a fixed limit.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    concurrency: usize,
    retry: RetryPolicy,
    cancellation: CancellationToken,
}

impl BatchExecutor {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        retry.validate()?;
        Ok(Self {
            concurrency,
            retry,
            cancellation: CancellationToken::new(),
        })
    }

    /// Uses `token` instead of the executor's own cancellation flag.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes every batch with `process`.
    ///
    /// Only the worker pool failing to start is an error; everything that
    /// goes wrong inside a batch, including a panic, becomes a
    /// [`BatchFailure`] for that batch alone.
    pub fn execute<F>(&self, batches: Vec<Batch>, process: F) -> Result<ExecutionReport, OptimizeError>
    where
        F: Fn(&Batch) -> Result<Route, BatchError> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|index| format!("route-batch-{index}"))
            .build()?;

        info!(
            batches = batches.len(),
            concurrency = self.concurrency,
            max_attempts = self.retry.max_attempts,
            "dispatching batches"
        );

        let outcomes: Vec<Result<Route, BatchFailure>> =
            pool.install(|| batches.par_iter().map(|batch| self.run_batch(batch, &process)).collect());

        let mut report = ExecutionReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(route) => report.routes.push(route),
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            routes = report.routes.len(),
            failures = report.failures.len(),
            "batch execution finished"
        );
        Ok(report)
    }

    fn run_batch<F>(&self, batch: &Batch, process: &F) -> Result<Route, BatchFailure>
    where
        F: Fn(&Batch) -> Result<Route, BatchError>,
    {
        let batch_id = batch.id();
        let mut attempt = 0;

        loop {
            if self.cancellation.is_cancelled() {
                warn!(batch_id, attempts = attempt, "batch abandoned after cancellation");
                return Err(BatchFailure::cancelled(batch_id, attempt));
            }
            attempt += 1;
            debug!(batch_id, attempt, records = batch.len(), "processing batch");

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(batch)))
                .unwrap_or_else(|payload| Err(BatchError::Internal(panic_message(payload.as_ref()))));

            match outcome {
                Ok(route) => {
                    if attempt > 1 {
                        info!(batch_id, attempt, "batch succeeded after retry");
                    }
                    return Ok(route);
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        batch_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient batch failure, backing off"
                    );
                    if !self.cancellation.sleep(delay) {
                        warn!(batch_id, attempts = attempt, "batch abandoned during backoff");
                        return Err(BatchFailure::cancelled(batch_id, attempt));
                    }
                }
                Err(err) => {
                    error!(batch_id, attempts = attempt, records = batch.len(), error = %err, "batch failed permanently");
                    return Err(BatchFailure::from_error(batch_id, attempt, &err));
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::record::{Coordinate, DeliveryId, DeliveryRecord};

    fn batches(count: usize) -> Vec<Batch> {
        (0..count)
            .map(|id| {
                let record = DeliveryRecord::new(
                    DeliveryId(id as u64),
                    Coordinate::new(40.0, -74.0),
                    Coordinate::new(40.1, -74.1),
                    Utc.with_ymd_and_hms(2025, 2, 20, 10, 0, 0).unwrap(),
                )
                .unwrap();
                Batch::new(id, vec![record])
            })
            .collect()
    }

    fn trivial_route(batch: &Batch) -> Result<Route, BatchError> {
        Ok(Route::new(batch.id(), batch.stops(), 1.0, Utc::now()))
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(BatchExecutor::new(0, RetryPolicy::immediate(1)).is_err());
    }

    #[test]
    fn test_routes_come_back_in_batch_order() {
        let executor = BatchExecutor::new(4, RetryPolicy::immediate(1)).unwrap();
        let report = executor.execute(batches(16), trivial_route).unwrap();
        let ids: Vec<usize> = report.routes.iter().map(|r| r.batch_id).collect();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let calls = AtomicUsize::new(0);
        let executor = BatchExecutor::new(1, RetryPolicy::immediate(3)).unwrap();
        let report = executor
            .execute(batches(1), |batch| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BatchError::Transient("resource exhausted".into()))
                } else {
                    trivial_route(batch)
                }
            })
            .unwrap();
        assert_eq!(report.routes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_are_recorded() {
        let executor = BatchExecutor::new(2, RetryPolicy::immediate(2)).unwrap();
        let report = executor
            .execute(batches(3), |batch| {
                if batch.id() == 1 {
                    Err(BatchError::Transient("still busy".into()))
                } else {
                    trivial_route(batch)
                }
            })
            .unwrap();
        assert_eq!(report.routes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.batch_id, 1);
        assert_eq!(failure.kind, FailureKind::RetriesExhausted);
        assert_eq!(failure.attempts, 2);
    }

    #[test]
    fn test_internal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let executor = BatchExecutor::new(1, RetryPolicy::immediate(5)).unwrap();
        let report = executor
            .execute(batches(1), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BatchError::Internal("empty graph".into()))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Internal);
    }

    #[test]
    fn test_panic_is_isolated_to_its_batch() {
        let executor = BatchExecutor::new(2, RetryPolicy::immediate(1)).unwrap();
        let report = executor
            .execute(batches(4), |batch| {
                if batch.id() == 2 {
                    panic!("boom");
                }
                trivial_route(batch)
            })
            .unwrap();
        assert_eq!(report.routes.len(), 3);
        assert_eq!(report.failures[0].batch_id, 2);
        assert!(report.failures[0].reason.contains("boom"));
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let executor = BatchExecutor::new(2, RetryPolicy::immediate(1)).unwrap();
        executor.cancellation_token().cancel();
        let report = executor.execute(batches(3), trivial_route).unwrap();
        assert!(report.routes.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().all(|f| f.kind == FailureKind::Cancelled && f.attempts == 0));
    }

    #[test]
    fn test_cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let retry = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(30));
        let executor = BatchExecutor::new(1, retry).unwrap().with_cancellation(token.clone());
        let started = Instant::now();
        let report = executor
            .execute(batches(1), |_| {
                token.cancel();
                Err(BatchError::Transient("interrupted".into()))
            })
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.failures[0].kind, FailureKind::Cancelled);
        assert_eq!(report.failures[0].attempts, 1);
    }

    #[test]
    fn test_token_sleep_completes_when_not_cancelled() {
        assert!(CancellationToken::new().sleep(Duration::from_millis(1)));
    }
}
