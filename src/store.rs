//! SQLite persistence of optimization results.
//!
//! Each result is written in a single transaction, so a run is either
//! stored completely or not at all. Stops and delivery ids go in as JSON
//! text and geometry as WKT.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::optimizer::OptimizationResult;
use crate::polyline::Polyline;
use crate::record::DeliveryId;
use crate::retry::RetryPolicy;
use crate::traits::RouteSink;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS optimized_routes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    route_id TEXT NOT NULL,
    batch_id INTEGER NOT NULL,
    delivery_ids TEXT NOT NULL,
    stops TEXT NOT NULL,
    total_distance_km REAL NOT NULL,
    geometry TEXT NOT NULL,
    computed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_optimized_routes_batch ON optimized_routes (batch_id);
CREATE TABLE IF NOT EXISTS failed_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);
";

/// A row of `optimized_routes`, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRoute {
    pub route_id: String,
    pub batch_id: usize,
    pub delivery_ids: Vec<DeliveryId>,
    pub total_distance_km: f64,
    pub geometry: Polyline,
    pub computed_at: String,
}

/// Writes routes and failed batches to a SQLite database.
#[derive(Debug)]
pub struct SqliteRouteSink {
    connection: Connection,
    path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl SqliteRouteSink {
    /// Opens (or creates) the database at `path`. The parent directory must
    /// already exist.
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, StoreError> {
        retry.validate()?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !dir.is_dir() {
                return Err(StoreError::MissingDirectory(dir.to_path_buf()));
            }
        }
        let connection = Connection::open(path)?;
        debug!(path = %path.display(), "opened route database");
        Self::with_connection(connection, Some(path.to_path_buf()), retry)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None, RetryPolicy::immediate(1))
    }

    fn with_connection(connection: Connection, path: Option<PathBuf>, retry: RetryPolicy) -> Result<Self, StoreError> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection,
            path,
            retry,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// All stored routes, oldest first.
    pub fn routes(&self) -> Result<Vec<StoredRoute>, StoreError> {
        let mut statement = self.connection.prepare(
            "SELECT route_id, batch_id, delivery_ids, total_distance_km, geometry, computed_at
             FROM optimized_routes ORDER BY id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut routes = Vec::new();
        for row in rows {
            let (route_id, batch_id, delivery_ids, total_distance_km, geometry, computed_at) = row?;
            routes.push(StoredRoute {
                route_id,
                batch_id: batch_id as usize,
                delivery_ids: serde_json::from_str(&delivery_ids)?,
                total_distance_km,
                geometry: Polyline::from_wkt(&geometry)?,
                computed_at,
            });
        }
        Ok(routes)
    }

    pub fn failed_batch_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM failed_batches", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn is_contention(err: &StoreError) -> bool {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
            matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

fn write_result(connection: &mut Connection, result: &OptimizationResult) -> Result<(), StoreError> {
    let computed_at = result.computed_at.to_rfc3339();
    let recorded_at = Utc::now().to_rfc3339();
    let transaction = connection.transaction()?;
    {
        let mut insert_route = transaction.prepare_cached(
            "INSERT INTO optimized_routes
                 (route_id, batch_id, delivery_ids, stops, total_distance_km, geometry, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for route in &result.routes {
            insert_route.execute(params![
                route.route_id,
                route.batch_id as i64,
                serde_json::to_string(&route.delivery_ids())?,
                serde_json::to_string(&route.stops)?,
                route.total_distance_km,
                route.geometry.to_wkt(),
                computed_at,
            ])?;
        }

        let mut insert_failure = transaction.prepare_cached(
            "INSERT INTO failed_batches (batch_id, kind, reason, attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for failure in &result.failures {
            insert_failure.execute(params![
                failure.batch_id as i64,
                failure.kind.as_str(),
                failure.reason,
                failure.attempts,
                recorded_at,
            ])?;
        }
    }
    transaction.commit()?;
    Ok(())
}

impl RouteSink for SqliteRouteSink {
    fn store(&mut self, result: &OptimizationResult) -> Result<(), StoreError> {
        let retry = self.retry;
        let connection = &mut self.connection;
        retry.run("store_routes", || write_result(connection, result), is_contention)?;
        info!(
            routes = result.routes.len(),
            failed_batches = result.failures.len(),
            "stored optimization result"
        );
        Ok(())
    }
}
