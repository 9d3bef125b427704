//! Polyline representation for route geometries.
//!
//! Routes carry their geometry as decoded coordinates. The text encoding
//! used by the result store is WKT (`LINESTRING (lon lat, ...)`), produced
//! and parsed only at that boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Coordinate;

const LINESTRING: &str = "LINESTRING";
const EMPTY: &str = "EMPTY";

/// A route geometry as an ordered list of coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Coordinate>,
}

/// The text could not be read as a WKT line string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid WKT line string: {0}")]
pub struct WktError(String);

impl Polyline {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self { points }
    }

    /// Returns a reference to the coordinate points.
    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    /// Consumes the polyline and returns the owned coordinate points.
    pub fn into_points(self) -> Vec<Coordinate> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Encodes as WKT. Axis order is longitude then latitude.
    ///
    /// Floats use Rust's shortest round-trip formatting, so
    /// [`Polyline::from_wkt`] gives back the exact same coordinates.
    pub fn to_wkt(&self) -> String {
        if self.points.is_empty() {
            return format!("{LINESTRING} {EMPTY}");
        }
        let body = self
            .points
            .iter()
            .map(|point| format!("{:?} {:?}", point.lon, point.lat))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{LINESTRING} ({body})")
    }

    pub fn from_wkt(text: &str) -> Result<Self, WktError> {
        let rest = text
            .trim()
            .strip_prefix(LINESTRING)
            .ok_or_else(|| WktError(format!("expected {LINESTRING}")))?
            .trim();

        if rest == EMPTY {
            return Ok(Self::new(Vec::new()));
        }

        let body = rest
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
            .ok_or_else(|| WktError("missing parentheses".to_string()))?;

        let points = body
            .split(',')
            .map(|pair| {
                let mut parts = pair.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(lon), Some(lat), None) => Ok(Coordinate::new(parse_axis(lat)?, parse_axis(lon)?)),
                    _ => Err(WktError(format!("bad point {:?}", pair.trim()))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(points))
    }
}

fn parse_axis(value: &str) -> Result<f64, WktError> {
    value
        .parse::<f64>()
        .map_err(|_| WktError(format!("bad number {:?}", value)))
}

impl fmt::Display for Polyline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}
