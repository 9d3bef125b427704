//! Order-preserving partition of records into bounded batches.

use crate::error::ValidationError;
use crate::record::{DeliveryRecord, Stop};

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// A contiguous, bounded slice of the input records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: usize,
    records: Vec<DeliveryRecord>,
}

impl Batch {
    pub fn new(id: usize, records: Vec<DeliveryRecord>) -> Self {
        Self { id, records }
    }

    /// Zero-based position of this batch in the input.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn records(&self) -> &[DeliveryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every pickup and dropoff stop, pickup first, in record order.
    ///
    /// A delivery's two stops always land in the same batch, but nothing
    /// relates stops across batches: each batch is routed on its own.
    pub fn stops(&self) -> Vec<Stop> {
        self.records.iter().flat_map(DeliveryRecord::stops).collect()
    }
}

/// Splits records into batches of at most `batch_size`.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: usize,
}

impl Default for Batcher {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Batcher {
    pub fn new(batch_size: usize) -> Result<Self, ValidationError> {
        if batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize(batch_size));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Partitions `records` in order. Only the last batch may be short, and
    /// an empty input yields no batches.
    pub fn split(&self, records: Vec<DeliveryRecord>) -> Vec<Batch> {
        let size = self.batch_size;
        let mut batches = Vec::with_capacity(records.len().div_ceil(size));
        let mut remaining = records.into_iter();

        loop {
            let chunk: Vec<DeliveryRecord> = remaining.by_ref().take(size).collect();
            if chunk.is_empty() {
                break;
            }
            batches.push(Batch::new(batches.len(), chunk));
        }

        batches
    }
}
