//! Route solver: nearest-neighbor construction plus bounded 2-opt.
//!
//! Produces an open Hamiltonian path (no return leg) over a batch's
//! distance graph. The path always starts at node 0, the pickup of the
//! batch's first record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SolveError;
use crate::graph::DistanceGraph;
use crate::route::Route;

/// Smallest gain (km) for which a 2-opt exchange counts as an improvement.
const MIN_GAIN_KM: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Scales the improvement cap of `n · ⌈log2 n⌉` accepted exchanges.
    pub iteration_factor: usize,
    /// Hard cap on accepted exchanges; overrides the scaled cap when set.
    pub max_iterations: Option<usize>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            iteration_factor: 1,
            max_iterations: None,
        }
    }
}

impl SolveOptions {
    /// Maximum number of improving exchanges for a graph of `n` nodes.
    pub fn iteration_cap(&self, n: usize) -> usize {
        if let Some(cap) = self.max_iterations {
            return cap;
        }
        let log2 = n.max(2).next_power_of_two().trailing_zeros() as usize;
        self.iteration_factor.saturating_mul(n.saturating_mul(log2))
    }
}

/// A visiting order over graph nodes with its lengths before and after
/// improvement.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub order: Vec<usize>,
    /// Path length straight out of nearest-neighbor construction.
    pub construction_distance: f64,
    /// Path length after 2-opt. Never greater than `construction_distance`.
    pub total_distance: f64,
    /// Number of accepted 2-opt exchanges.
    pub improvements: usize,
}

/// Solves one graph into one route.
#[derive(Debug, Clone, Default)]
pub struct RouteSolver {
    options: SolveOptions,
}

impl RouteSolver {
    pub fn new(options: SolveOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Computes the visiting order for `graph`.
    pub fn solve(&self, graph: &DistanceGraph) -> Result<Solution, SolveError> {
        let mut order = nearest_neighbor(graph)?;
        let construction_distance = graph.path_length(&order);
        let cap = self.options.iteration_cap(graph.len());
        let improvements = two_opt(graph, &mut order, cap);
        let total_distance = graph.path_length(&order);

        debug!(
            nodes = graph.len(),
            construction_km = construction_distance,
            total_km = total_distance,
            improvements,
            cap,
            "solved graph"
        );

        Ok(Solution {
            order,
            construction_distance,
            total_distance,
            improvements,
        })
    }

    /// Solves and consumes `graph`, returning the finished route.
    pub fn solve_route(
        &self,
        graph: DistanceGraph,
        batch_id: usize,
        computed_at: DateTime<Utc>,
    ) -> Result<Route, SolveError> {
        let solution = self.solve(&graph)?;
        let stops = graph.into_stops();
        let ordered = solution.order.iter().map(|&node| stops[node]).collect();
        Ok(Route::new(batch_id, ordered, solution.total_distance, computed_at))
    }
}

// ============================================================================
// Construction
// ============================================================================

/// Greedy nearest-neighbor path starting at node 0.
///
/// Ties go to the lowest node index, so the result depends only on the
/// graph.
pub fn nearest_neighbor(graph: &DistanceGraph) -> Result<Vec<usize>, SolveError> {
    let n = graph.len();
    if n == 0 {
        return Err(SolveError::EmptyGraph);
    }

    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut current = 0;
    visited[current] = true;
    order.push(current);

    while order.len() < n {
        let mut best: Option<(usize, f64)> = None;
        for (candidate, _) in visited.iter().enumerate().filter(|(_, seen)| !**seen) {
            let d = graph.weight(current, candidate);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((candidate, d)),
            }
        }
        let Some((next, _)) = best else {
            break;
        };
        visited[next] = true;
        order.push(next);
        current = next;
    }

    Ok(order)
}

// ============================================================================
// Local Search Operators
// ============================================================================

/// 2-opt over an open path with a fixed first node.
///
/// Reversing `order[i+1..=j]` swaps edges (i, i+1) and (j, j+1) for
/// (i, j) and (i+1, j+1); when `j` is the last node only the first edge
/// changes. Exchanges are applied as soon as one strictly shortens the
/// path. Stops when a full sweep finds nothing or after `max_iterations`
/// exchanges. Returns the number of exchanges applied.
pub fn two_opt(graph: &DistanceGraph, order: &mut [usize], max_iterations: usize) -> usize {
    let n = order.len();
    if n < 3 {
        return 0;
    }

    let mut applied = 0;
    let mut improved = true;

    while improved && applied < max_iterations {
        improved = false;
        for i in 0..n - 2 {
            for j in i + 2..n {
                let (a, b, c) = (order[i], order[i + 1], order[j]);
                let mut delta = graph.weight(a, c) - graph.weight(a, b);
                if j + 1 < n {
                    let d = order[j + 1];
                    delta += graph.weight(b, d) - graph.weight(c, d);
                }

                if delta < -MIN_GAIN_KM {
                    order[i + 1..=j].reverse();
                    applied += 1;
                    improved = true;
                    if applied >= max_iterations {
                        return applied;
                    }
                }
            }
        }
    }

    applied
}
