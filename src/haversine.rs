//! Haversine great-circle distance.
//!
//! Treats the Earth as a sphere. Good to within about half a percent,
//! which is plenty for ordering stops.

use crate::error::ValidationError;
use crate::record::Coordinate;
use crate::traits::DistanceModel;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Spherical great-circle distance model.
#[derive(Debug, Clone)]
pub struct Haversine {
    /// Sphere radius in kilometers.
    pub radius_km: f64,
}

impl Default for Haversine {
    fn default() -> Self {
        Self {
            radius_km: EARTH_RADIUS_KM,
        }
    }
}

impl Haversine {
    pub fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }

    /// Central angle between two points in radians. Inputs are not checked.
    fn central_angle(from: Coordinate, to: Coordinate) -> f64 {
        let lat1_rad = from.lat.to_radians();
        let lat2_rad = to.lat.to_radians();
        let delta_lat = (to.lat - from.lat).to_radians();
        let delta_lng = (to.lon - from.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        // Rounding can push `a` a hair above 1 for antipodal points.
        2.0 * a.min(1.0).sqrt().asin()
    }

    /// Great-circle distance in kilometers without range checks.
    pub fn haversine_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        self.radius_km * Self::central_angle(from, to)
    }
}

impl DistanceModel for Haversine {
    fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, ValidationError> {
        from.validate()?;
        to.validate()?;
        if from == to {
            return Ok(0.0);
        }
        Ok(self.haversine_km(from, to))
    }
}
