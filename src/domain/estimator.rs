//! Position estimation from smoothed beacon distances
//!
//! Two strategies:
//! - Weighted centroid: `weight(b) = 1 / d(b)^2`, normalized; valid for any
//!   number of beacons and always inside their convex hull.
//! - Trilateration: subtract the reference beacon's circle equation from the
//!   others and solve the resulting linear system by normal equations. With
//!   exactly three beacons this is the closed-form solve; with more it is the
//!   least-squares fit. Near-singular geometry is rejected by tolerance and the
//!   caller falls back to the centroid.

use crate::domain::error::EngineError;
use crate::domain::types::Position;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Relative singularity threshold: `det(AᵀA) / (trace(AᵀA) / 2)²`.
/// Rotation invariant, 1.0 for perfectly conditioned geometry, 0.0 for collinear.
const SINGULAR_TOLERANCE: f64 = 1e-4;

/// Minimum number of beacons for the linear solve
const MIN_TRILATERATION_BEACONS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMode {
    /// Inverse-square weighted average of beacon positions
    #[default]
    WeightedCentroid,
    /// Linearized solve when ≥3 beacons, centroid otherwise
    Trilateration,
}

impl EstimationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMode::WeightedCentroid => "weighted_centroid",
            EstimationMode::Trilateration => "trilateration",
        }
    }
}

/// Strategy that actually produced an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    WeightedCentroid,
    Trilateration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub position: Position,
    pub method: Method,
    pub beacons_used: usize,
    /// Trilateration was attempted but the geometry was singular
    pub fell_back: bool,
}

/// A known beacon position paired with a distance to it
#[derive(Debug, Clone, Copy)]
struct Anchor {
    position: Position,
    distance: f64,
}

/// Stateless estimator; borrows distances and positions for one call
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionEstimator {
    mode: EstimationMode,
}

impl PositionEstimator {
    pub fn new(mode: EstimationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EstimationMode {
        self.mode
    }

    /// Position for the given distances, or the origin sentinel when no
    /// distance refers to a known beacon.
    pub fn estimate(
        &self,
        distances: &BTreeMap<String, f64>,
        beacon_positions: &FxHashMap<String, Position>,
    ) -> Position {
        self.locate(distances, beacon_positions).map(|e| e.position).unwrap_or(Position::ORIGIN)
    }

    /// Like [`estimate`](Self::estimate) but reports which strategy was used
    /// and signals `InsufficientData` instead of returning the sentinel.
    pub fn locate(
        &self,
        distances: &BTreeMap<String, f64>,
        beacon_positions: &FxHashMap<String, Position>,
    ) -> Result<Estimate, EngineError> {
        let anchors = usable_anchors(distances, beacon_positions);
        if anchors.is_empty() {
            return Err(EngineError::InsufficientData { usable: 0 });
        }

        let mut fell_back = false;
        if self.mode == EstimationMode::Trilateration && anchors.len() >= MIN_TRILATERATION_BEACONS
        {
            match solve_linear(&anchors) {
                Ok(position) => {
                    return Ok(Estimate {
                        position,
                        method: Method::Trilateration,
                        beacons_used: anchors.len(),
                        fell_back: false,
                    });
                }
                Err(e) => {
                    debug!(error = %e, beacons = %anchors.len(), "trilateration_fallback");
                    fell_back = true;
                }
            }
        }

        let position = centroid(&anchors)
            .ok_or(EngineError::InsufficientData { usable: anchors.len() })?;
        Ok(Estimate { position, method: Method::WeightedCentroid, beacons_used: anchors.len(), fell_back })
    }

    /// Confidence-weighted centroid over known beacons
    pub fn weighted_centroid(
        distances: &BTreeMap<String, f64>,
        beacon_positions: &FxHashMap<String, Position>,
    ) -> Option<Position> {
        centroid(&usable_anchors(distances, beacon_positions))
    }

    /// Linearized trilateration over known beacons (≥3 required)
    pub fn trilaterate(
        distances: &BTreeMap<String, f64>,
        beacon_positions: &FxHashMap<String, Position>,
    ) -> Result<Position, EngineError> {
        solve_linear(&usable_anchors(distances, beacon_positions))
    }
}

/// Distances for known beacons, ordered by beacon id. Non-finite or
/// non-positive distances are not usable as weights and are skipped.
fn usable_anchors(
    distances: &BTreeMap<String, f64>,
    beacon_positions: &FxHashMap<String, Position>,
) -> Vec<Anchor> {
    distances
        .iter()
        .filter(|(_, d)| d.is_finite() && **d > 0.0)
        .filter_map(|(id, &distance)| {
            beacon_positions.get(id).map(|&position| Anchor { position, distance })
        })
        .collect()
}

fn centroid(anchors: &[Anchor]) -> Option<Position> {
    let weight_sum: f64 = anchors.iter().map(|a| 1.0 / (a.distance * a.distance)).sum();
    if !(weight_sum > 0.0 && weight_sum.is_finite()) {
        return None;
    }

    let (x, y) = anchors.iter().fold((0.0, 0.0), |(x, y), a| {
        let w = 1.0 / (a.distance * a.distance) / weight_sum;
        (x + w * a.position.x, y + w * a.position.y)
    });
    Some(Position::new(x, y))
}

fn solve_linear(anchors: &[Anchor]) -> Result<Position, EngineError> {
    if anchors.len() < MIN_TRILATERATION_BEACONS {
        return Err(EngineError::InsufficientData { usable: anchors.len() });
    }

    let reference = anchors[0];
    let (x0, y0, d0) = (reference.position.x, reference.position.y, reference.distance);

    // Normal equations AᵀA p = Aᵀb, accumulated row by row
    let (mut s_xx, mut s_xy, mut s_yy, mut t_x, mut t_y) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for anchor in &anchors[1..] {
        let (xi, yi, di) = (anchor.position.x, anchor.position.y, anchor.distance);
        let a = 2.0 * (xi - x0);
        let b = 2.0 * (yi - y0);
        let c = d0 * d0 - di * di + xi * xi - x0 * x0 + yi * yi - y0 * y0;
        s_xx += a * a;
        s_xy += a * b;
        s_yy += b * b;
        t_x += a * c;
        t_y += b * c;
    }

    let det = s_xx * s_yy - s_xy * s_xy;
    let half_trace = (s_xx + s_yy) / 2.0;
    if half_trace <= 0.0 || det <= SINGULAR_TOLERANCE * half_trace * half_trace {
        return Err(EngineError::SingularGeometry);
    }

    let x = (s_yy * t_x - s_xy * t_y) / det;
    let y = (s_xx * t_y - s_xy * t_x) / det;
    if !(x.is_finite() && y.is_finite()) {
        return Err(EngineError::SingularGeometry);
    }
    Ok(Position::new(x, y))
}
