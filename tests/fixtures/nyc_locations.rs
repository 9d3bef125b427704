//! Lower and midtown Manhattan locations for delivery fixtures.
//!
//! Coordinates are rounded street-level positions; nothing here depends on
//! road data, only on great-circle distance.

use batch_route_planner::record::{Coordinate, DeliveryRecord, RawDeliveryRecord};

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

// ============================================================================
// Pickup points (warehouses, restaurants)
// ============================================================================

pub const PICKUPS: &[Location] = &[
    Location::new("City Hall", 40.7128, -74.0060),
    Location::new("Chinatown", 40.7158, -73.9970),
    Location::new("SoHo", 40.7233, -74.0030),
    Location::new("West Village", 40.7358, -74.0036),
    Location::new("Union Square", 40.7359, -73.9911),
    Location::new("Chelsea Market", 40.7424, -74.0061),
    Location::new("Flatiron", 40.7411, -73.9897),
    Location::new("Murray Hill", 40.7479, -73.9757),
];

// ============================================================================
// Drop-off points (residential and offices)
// ============================================================================

pub const DROPOFFS: &[Location] = &[
    Location::new("Battery Park City", 40.7115, -74.0165),
    Location::new("Tribeca", 40.7163, -74.0086),
    Location::new("Lower East Side", 40.7150, -73.9843),
    Location::new("East Village", 40.7265, -73.9815),
    Location::new("Greenwich Village", 40.7336, -73.9998),
    Location::new("Gramercy", 40.7368, -73.9845),
    Location::new("Hudson Yards", 40.7538, -74.0020),
    Location::new("Koreatown", 40.7478, -73.9865),
    Location::new("Times Square", 40.7580, -73.9855),
];

/// `count` raw rows with ids starting at `first_id`.
///
/// Locations cycle through the tables above with a small per-row offset so
/// no two rows share a coordinate.
pub fn raw_deliveries(first_id: u64, count: usize) -> Vec<RawDeliveryRecord> {
    (0..count)
        .map(|i| {
            let pickup = &PICKUPS[i % PICKUPS.len()];
            let dropoff = &DROPOFFS[(i * 5 + 3) % DROPOFFS.len()];
            let jitter = i as f64 * 1e-5;
            RawDeliveryRecord {
                delivery_id: first_id + i as u64,
                pickup_lat: pickup.lat + jitter,
                pickup_lon: pickup.lon - jitter,
                dropoff_lat: dropoff.lat - jitter,
                dropoff_lon: dropoff.lon + jitter,
                timestamp: format!("2025-02-20 {:02}:{:02}:00", 8 + (i / 60) % 12, i % 60),
            }
        })
        .collect()
}

/// Validated form of [`raw_deliveries`].
pub fn deliveries(first_id: u64, count: usize) -> Vec<DeliveryRecord> {
    raw_deliveries(first_id, count)
        .into_iter()
        .map(|raw| DeliveryRecord::try_from(raw).expect("fixture rows are valid"))
        .collect()
}
