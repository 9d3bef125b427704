//! Optimized route output.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::polyline::Polyline;
use crate::record::{DeliveryId, Stop};

/// The visiting order computed for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub route_id: String,
    pub batch_id: usize,
    /// Every stop of the batch, exactly once, in visiting order.
    pub stops: Vec<Stop>,
    /// Sum of great-circle legs between consecutive stops.
    pub total_distance_km: f64,
    /// The stop coordinates in visiting order.
    pub geometry: Polyline,
    pub computed_at: DateTime<Utc>,
}

impl Route {
    /// Assembles a route from stops already in visiting order.
    pub fn new(batch_id: usize, stops: Vec<Stop>, total_distance_km: f64, computed_at: DateTime<Utc>) -> Self {
        let geometry = Polyline::new(stops.iter().map(|stop| stop.coordinate).collect());
        Self {
            route_id: route_id_for(batch_id),
            batch_id,
            stops,
            total_distance_km,
            geometry,
            computed_at,
        }
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Delivery ids in the order each delivery is first reached.
    pub fn delivery_ids(&self) -> Vec<DeliveryId> {
        let mut seen = HashSet::new();
        self.stops
            .iter()
            .map(|stop| stop.delivery_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

pub fn route_id_for(batch_id: usize) -> String {
    format!("route-{batch_id:06}")
}
