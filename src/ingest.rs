//! CSV parsing of delivery records.
//!
//! A document with a missing header or missing columns is unusable and
//! fails as a whole. Individual bad rows are rejected and reported, and the
//! rest are kept.

use std::io::Read;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info};

use crate::error::{IngestError, ValidationError};
use crate::record::{DeliveryRecord, RawDeliveryRecord, RecordRejection, validate_numbered};
use crate::traits::CsvDocument;

/// Columns every delivery CSV must have.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "delivery_id",
    "pickup_lat",
    "pickup_lon",
    "dropoff_lat",
    "dropoff_lon",
    "timestamp",
];

/// Five deliveries in lower Manhattan, for smoke runs without a data store.
pub const SAMPLE_CSV: &str = "\
delivery_id,pickup_lat,pickup_lon,dropoff_lat,dropoff_lon,timestamp
10001,40.7128,-74.0060,40.7140,-74.0070,2025-02-20 10:00:00
10002,40.7130,-74.0050,40.7150,-74.0060,2025-02-20 10:05:00
10003,40.7140,-74.0070,40.7128,-74.0060,2025-02-20 10:10:00
10004,40.7150,-74.0080,40.7160,-74.0090,2025-02-20 10:16:00
10005,40.7160,-74.0090,40.7170,-74.0100,2025-02-20 10:20:00
";

/// Validated records from one or more documents, plus the rows dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecords {
    pub records: Vec<DeliveryRecord>,
    pub rejected: Vec<RecordRejection>,
}

/// Raw rows from one document, numbered from `first_row`.
struct RawRows {
    rows: Vec<(usize, RawDeliveryRecord)>,
    malformed: Vec<RecordRejection>,
    next_row: usize,
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::All).flexible(false).from_reader(input)
}

fn check_header(headers: &StringRecord, origin: &str) -> Result<(), IngestError> {
    if headers.iter().all(|column| column.is_empty()) {
        return Err(IngestError::EmptyInput {
            origin: origin.to_string(),
        });
    }
    let missing = REQUIRED_COLUMNS
        .iter()
        .any(|required| !headers.iter().any(|column| column == *required));
    if missing {
        return Err(IngestError::SchemaMismatch {
            origin: origin.to_string(),
            expected: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            found: headers.iter().map(str::to_string).collect(),
        });
    }
    Ok(())
}

/// True if `contents` starts with a header carrying every required column.
pub fn has_required_columns(contents: &str) -> bool {
    let mut csv = reader(contents.as_bytes());
    csv.headers().is_ok_and(|headers| check_header(headers, "").is_ok())
}

fn read_rows<R: Read>(input: R, origin: &str, first_row: usize) -> Result<RawRows, IngestError> {
    let mut csv = reader(input);
    let headers = csv.headers().map_err(|source| IngestError::Csv {
        origin: origin.to_string(),
        source,
    })?;
    check_header(headers, origin)?;

    let mut rows = Vec::new();
    let mut malformed = Vec::new();
    let mut row = first_row;
    for result in csv.deserialize::<RawDeliveryRecord>() {
        match result {
            Ok(raw) => rows.push((row, raw)),
            Err(err) => malformed.push(RecordRejection {
                row,
                delivery_id: None,
                error: ValidationError::Malformed(format!("{origin}: {err}")),
            }),
        }
        row += 1;
    }

    debug!(origin, rows = rows.len(), malformed = malformed.len(), "read CSV rows");
    Ok(RawRows {
        rows,
        malformed,
        next_row: row,
    })
}

/// Parses and validates a single CSV stream.
pub fn parse_csv<R: Read>(input: R, origin: &str) -> Result<ParsedRecords, IngestError> {
    let raw = read_rows(input, origin, 1)?;
    Ok(validate(raw.rows, raw.malformed))
}

/// Parses documents in order and validates them as one input.
///
/// Row numbers run on across documents and duplicate ids are caught
/// across document boundaries.
pub fn parse_documents(documents: &[CsvDocument]) -> Result<ParsedRecords, IngestError> {
    let mut rows = Vec::new();
    let mut malformed = Vec::new();
    let mut next_row = 1;

    for document in documents {
        let raw = read_rows(document.contents.as_bytes(), &document.origin, next_row)?;
        rows.extend(raw.rows);
        malformed.extend(raw.malformed);
        next_row = raw.next_row;
    }

    let parsed = validate(rows, malformed);
    info!(
        documents = documents.len(),
        records = parsed.records.len(),
        rejected = parsed.rejected.len(),
        "parsed delivery records"
    );
    Ok(parsed)
}

fn validate(rows: Vec<(usize, RawDeliveryRecord)>, mut malformed: Vec<RecordRejection>) -> ParsedRecords {
    let (records, mut rejected) = validate_numbered(rows);
    rejected.append(&mut malformed);
    rejected.sort_by_key(|rejection| rejection.row);
    ParsedRecords { records, rejected }
}
