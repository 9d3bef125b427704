//! Delivery records, coordinates and the stops derived from them.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Checks that both components are finite and within range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_as("lat", "lon")
    }

    fn validate_as(&self, lat_field: &'static str, lon_field: &'static str) -> Result<(), ValidationError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::InvalidCoordinate {
                field: lat_field,
                value: self.lat,
            });
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ValidationError::InvalidCoordinate {
                field: lon_field,
                value: self.lon,
            });
        }
        Ok(())
    }
}

/// Unique identifier of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub u64);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unvalidated input row, as it appears in the CSV schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeliveryRecord {
    pub delivery_id: u64,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub timestamp: String,
}

/// A validated delivery. Coordinates are in range and the timestamp parsed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawDeliveryRecord")]
pub struct DeliveryRecord {
    id: DeliveryId,
    pickup: Coordinate,
    dropoff: Coordinate,
    timestamp: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(
        id: DeliveryId,
        pickup: Coordinate,
        dropoff: Coordinate,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        pickup.validate_as("pickup_lat", "pickup_lon")?;
        dropoff.validate_as("dropoff_lat", "dropoff_lon")?;
        Ok(Self {
            id,
            pickup,
            dropoff,
            timestamp,
        })
    }

    pub fn id(&self) -> DeliveryId {
        self.id
    }

    pub fn pickup(&self) -> Coordinate {
        self.pickup
    }

    pub fn dropoff(&self) -> Coordinate {
        self.dropoff
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The pickup stop followed by the dropoff stop.
    pub fn stops(&self) -> [Stop; 2] {
        [
            Stop {
                delivery_id: self.id,
                role: StopRole::Pickup,
                coordinate: self.pickup,
            },
            Stop {
                delivery_id: self.id,
                role: StopRole::Dropoff,
                coordinate: self.dropoff,
            },
        ]
    }
}

impl TryFrom<RawDeliveryRecord> for DeliveryRecord {
    type Error = ValidationError;

    fn try_from(raw: RawDeliveryRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&raw.timestamp)?;
        DeliveryRecord::new(
            DeliveryId(raw.delivery_id),
            Coordinate::new(raw.pickup_lat, raw.pickup_lon),
            Coordinate::new(raw.dropoff_lat, raw.dropoff_lon),
            timestamp,
        )
    }
}

/// Parses the date-time spellings accepted in the `timestamp` column.
///
/// RFC 3339 values are normalized to UTC; values without an offset are
/// taken as UTC. A bare date means midnight.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| ValidationError::InvalidTimestamp(value.to_string()))
}

/// Whether a stop is where a delivery is collected or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopRole {
    Pickup,
    Dropoff,
}

/// A single geocoded point belonging to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub delivery_id: DeliveryId,
    pub role: StopRole,
    pub coordinate: Coordinate,
}

/// A record that was dropped during validation, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRejection {
    /// 1-based data row in the input, header rows excluded.
    pub row: usize,
    pub delivery_id: Option<DeliveryId>,
    #[serde(serialize_with = "serialize_display")]
    pub error: ValidationError,
}

fn serialize_display<S: serde::Serializer>(error: &ValidationError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Validates every row independently.
///
/// Valid records keep their input order. Rows that fail are reported with
/// their 1-based position; a repeated `delivery_id` is rejected after its
/// first occurrence.
pub fn validate_records<I>(raw: I) -> (Vec<DeliveryRecord>, Vec<RecordRejection>)
where
    I: IntoIterator<Item = RawDeliveryRecord>,
{
    validate_numbered(raw.into_iter().enumerate().map(|(index, row)| (index + 1, row)))
}

/// Like [`validate_records`], for rows that already carry their row number.
pub fn validate_numbered<I>(rows: I) -> (Vec<DeliveryRecord>, Vec<RecordRejection>)
where
    I: IntoIterator<Item = (usize, RawDeliveryRecord)>,
{
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();

    for (row_number, row) in rows {
        let id = DeliveryId(row.delivery_id);
        let outcome = DeliveryRecord::try_from(row).and_then(|record| {
            if seen.insert(id) {
                Ok(record)
            } else {
                Err(ValidationError::DuplicateDeliveryId(id))
            }
        });
        match outcome {
            Ok(record) => accepted.push(record),
            Err(error) => rejected.push(RecordRejection {
                row: row_number,
                delivery_id: Some(id),
                error,
            }),
        }
    }

    (accepted, rejected)
}
