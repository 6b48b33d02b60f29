//! # Path-geometry feature extraction.
//!
//! Reduces a drawing (or a single layer's paths) to the four scalars the
//! duration model consumes: pen-down length, pen-up travel length, lift
//! count, and sharp-corner count.
//!
//! Travel length depends on execution order, which is unknown before the
//! optimization pipeline has run:
//! - [`TravelMode::NearestNeighbor`] approximates the travel an optimizer
//!   would achieve by greedy nearest-neighbor chaining from the home origin;
//! - [`TravelMode::FileOrder`] takes the exact inter-path gaps in the order
//!   the paths appear (used after optimization, when order is final).

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Polyline};

/// Direction changes sharper than this count as corners.
pub const CORNER_ANGLE_DEG: f64 = 45.0;

/// How pen-up travel length is derived from path order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelMode {
    /// Greedy nearest-neighbor approximation (pre-optimization).
    NearestNeighbor,
    /// Exact gaps in file order (post-optimization).
    FileOrder,
}

/// The four scalars of the duration model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PathFeatures {
    /// Total pen-down path length (mm).
    pub down_len: f64,
    /// Total pen-up travel length (mm).
    pub travel_len: f64,
    /// Number of pen lifts (one per stroke).
    pub lifts: u32,
    /// Number of sharp direction changes.
    pub corners: u32,
}

impl PathFeatures {
    /// Component-wise sum, used to aggregate per-layer features into a job
    /// total.
    pub fn add(&self, other: &PathFeatures) -> PathFeatures {
        PathFeatures {
            down_len: self.down_len + other.down_len,
            travel_len: self.travel_len + other.travel_len,
            lifts: self.lifts + other.lifts,
            corners: self.corners + other.corners,
        }
    }
}

/// Extracts features from a set of pen-down paths.
///
/// Empty polylines are skipped entirely: they produce no pen-down ink, no
/// lift, and no travel.
pub fn extract(paths: &[Polyline], mode: TravelMode) -> PathFeatures {
    let paths: Vec<&Polyline> = paths.iter().filter(|p| !p.points.is_empty()).collect();

    let down_len = paths.iter().map(|p| p.length()).sum();
    let corners = paths.iter().map(|p| p.corners(CORNER_ANGLE_DEG)).sum();
    let lifts = paths.len() as u32;

    let travel_len = match mode {
        TravelMode::FileOrder => file_order_travel(&paths),
        TravelMode::NearestNeighbor => nearest_neighbor_travel(&paths),
    };

    PathFeatures {
        down_len,
        travel_len,
        lifts,
        corners,
    }
}

/// Exact pen-up travel for the given order: origin to the first start, then
/// each end to the next start.
fn file_order_travel(paths: &[&Polyline]) -> f64 {
    let mut pos = Point::ORIGIN;
    let mut travel = 0.0;
    for path in paths {
        let (start, end) = match (path.start(), path.end()) {
            (Some(s), Some(e)) => (s, e),
            _ => continue,
        };
        travel += pos.distance_to(&start);
        pos = end;
    }
    travel
}

/// Greedy nearest-neighbor travel approximation: from the current position,
/// always jump to the unvisited path with the closest start point.
fn nearest_neighbor_travel(paths: &[&Polyline]) -> f64 {
    let mut remaining: Vec<&Polyline> = paths.to_vec();
    let mut pos = Point::ORIGIN;
    let mut travel = 0.0;

    while !remaining.is_empty() {
        let (best_idx, best_dist) = remaining
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.start().map(|s| (i, pos.distance_to(&s))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .expect("non-empty polylines have a start");
        let chosen = remaining.swap_remove(best_idx);
        travel += best_dist;
        if let Some(end) = chosen.end() {
            pos = end;
        }
    }
    travel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Polyline {
        Polyline::new(vec![Point::new(x0, y0), Point::new(x1, y1)])
    }

    #[test]
    fn down_length_and_lifts_are_order_independent() {
        let paths = vec![seg(0.0, 0.0, 10.0, 0.0), seg(30.0, 0.0, 40.0, 0.0)];
        for mode in [TravelMode::FileOrder, TravelMode::NearestNeighbor] {
            let f = extract(&paths, mode);
            assert_eq!(f.down_len, 20.0);
            assert_eq!(f.lifts, 2);
            assert_eq!(f.corners, 0);
        }
    }

    #[test]
    fn file_order_travel_counts_exact_gaps() {
        // origin -> (0,0) = 0, (10,0) -> (30,0) = 20.
        let paths = vec![seg(0.0, 0.0, 10.0, 0.0), seg(30.0, 0.0, 40.0, 0.0)];
        let f = extract(&paths, TravelMode::FileOrder);
        assert_eq!(f.travel_len, 20.0);
    }

    #[test]
    fn nearest_neighbor_beats_bad_file_order() {
        // File order zig-zags; NN visits the near path first.
        let paths = vec![seg(100.0, 0.0, 110.0, 0.0), seg(5.0, 0.0, 10.0, 0.0)];
        let naive = extract(&paths, TravelMode::FileOrder);
        let nn = extract(&paths, TravelMode::NearestNeighbor);
        assert!(nn.travel_len < naive.travel_len);
        // NN: origin->(5,0)=5, (10,0)->(100,0)=90.
        assert_eq!(nn.travel_len, 95.0);
    }

    #[test]
    fn empty_polylines_are_ignored() {
        let paths = vec![Polyline::new(vec![]), seg(0.0, 0.0, 10.0, 0.0)];
        let f = extract(&paths, TravelMode::NearestNeighbor);
        assert_eq!(f.lifts, 1);
        assert_eq!(f.down_len, 10.0);
    }

    #[test]
    fn corners_accumulate_across_paths() {
        let elbow = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ]);
        let f = extract(&[elbow.clone(), elbow], TravelMode::FileOrder);
        assert_eq!(f.corners, 2);
    }
}
