//! Complete distance graph over the stops of one batch.
//!
//! Weights are symmetric, so only the strict upper triangle is stored:
//! n·(n−1)/2 entries for n stops.

use tracing::debug;

use crate::batcher::Batch;
use crate::error::ValidationError;
use crate::haversine::Haversine;
use crate::record::Stop;
use crate::traits::DistanceModel;

/// Stops plus their pairwise distances in kilometers.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceGraph {
    stops: Vec<Stop>,
    weights: Vec<f64>,
}

impl DistanceGraph {
    /// Computes every pairwise weight with `model`.
    ///
    /// Node `i` is `stops[i]`; insertion order is kept and is what the
    /// solver uses to break ties.
    pub fn build<M>(stops: Vec<Stop>, model: &M) -> Result<Self, ValidationError>
    where
        M: DistanceModel + ?Sized,
    {
        let n = stops.len();
        let mut weights = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for j in 1..n {
            for i in 0..j {
                weights.push(model.distance(stops[i].coordinate, stops[j].coordinate)?);
            }
        }
        Ok(Self { stops, weights })
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn into_stops(self) -> Vec<Stop> {
        self.stops
    }

    /// Distance between nodes `a` and `b`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn weight(&self, a: usize, b: usize) -> f64 {
        debug_assert!(a < self.len() && b < self.len(), "node index out of bounds");
        match a.cmp(&b) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.weights[b * (b - 1) / 2 + a],
            std::cmp::Ordering::Greater => self.weights[a * (a - 1) / 2 + b],
        }
    }

    /// Sum of consecutive edge weights along `order`.
    pub fn path_length(&self, order: &[usize]) -> f64 {
        order.windows(2).map(|pair| self.weight(pair[0], pair[1])).sum()
    }
}

/// Turns batches into distance graphs.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder<M = Haversine> {
    model: M,
}

impl<M: DistanceModel> GraphBuilder<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn build(&self, batch: &Batch) -> Result<DistanceGraph, ValidationError> {
        let graph = DistanceGraph::build(batch.stops(), &self.model)?;
        debug!(batch_id = batch.id(), stops = graph.len(), "built distance graph");
        Ok(graph)
    }
}
