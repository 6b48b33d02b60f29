//! # Pen model and the available-pen pool.
//!
//! A [`Pen`] is an independent entity referenced (never owned) by layers and
//! by calibration keys. The [`PenPool`] is a read-only snapshot of the pens
//! physically available for a job; matching against layer hints is
//! deterministic so that repeated planning yields identical assignments.

use serde::{Deserialize, Serialize};

use crate::geometry::PenHint;

/// Default compatibility threshold for width matching, in millimeters.
///
/// A layer hint with no pool pen within this width distance cannot be
/// assigned.
pub const WIDTH_TOLERANCE_MM: f64 = 0.15;

/// A physical pen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pen {
    /// Stable identifier, unique within the pool (e.g. "micron-005-black").
    pub id: String,
    /// Nib width in millimeters.
    pub width_mm: f64,
    /// Maximum safe drawing speed for this pen, in mm/s.
    pub speed_cap_mm_s: f64,
    /// Number of passes to draw each stroke (pressure substitute).
    pub passes: u32,
    /// Color identifier.
    pub color: String,
}

impl Pen {
    pub fn new(id: impl Into<String>, width_mm: f64, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            width_mm,
            speed_cap_mm_s: 50.0,
            passes: 1,
            color: color.into(),
        }
    }
}

/// Read-only snapshot of the pens available for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PenPool {
    pub pens: Vec<Pen>,
}

impl PenPool {
    pub fn new(pens: Vec<Pen>) -> Self {
        Self { pens }
    }

    /// Looks a pen up by id.
    pub fn get(&self, id: &str) -> Option<&Pen> {
        self.pens.iter().find(|p| p.id == id)
    }

    /// The single pen used for unannotated single-pen jobs: the first pool
    /// entry.
    pub fn default_pen(&self) -> Option<&Pen> {
        self.pens.first()
    }

    /// Deterministically matches a layer hint to the closest available pen.
    ///
    /// Preference order:
    /// 1. exact color **and** width match;
    /// 2. nearest width within [`WIDTH_TOLERANCE_MM`], color ignored.
    ///
    /// Ties are broken by pool order, so the same pool and hint always
    /// resolve to the same pen. Returns `None` when nothing is within
    /// tolerance.
    pub fn match_hint(&self, hint: &PenHint) -> Option<&Pen> {
        if let Some(color) = &hint.color {
            if let Some(exact) = self.pens.iter().find(|p| {
                p.color.eq_ignore_ascii_case(color)
                    && (p.width_mm - hint.width_mm).abs() < f64::EPSILON
            }) {
                return Some(exact);
            }
        }

        let mut best: Option<(&Pen, f64)> = None;
        for pen in &self.pens {
            let dist = (pen.width_mm - hint.width_mm).abs();
            if dist > WIDTH_TOLERANCE_MM {
                continue;
            }
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((pen, dist)),
            }
        }
        best.map(|(pen, _)| pen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PenPool {
        PenPool::new(vec![
            Pen::new("fine-black", 0.3, "black"),
            Pen::new("broad-black", 0.8, "black"),
            Pen::new("fine-red", 0.3, "red"),
        ])
    }

    #[test]
    fn exact_color_and_width_wins() {
        let hint = PenHint {
            width_mm: 0.3,
            color: Some("red".into()),
        };
        assert_eq!(pool().match_hint(&hint).unwrap().id, "fine-red");
    }

    #[test]
    fn nearest_width_within_tolerance() {
        let hint = PenHint {
            width_mm: 0.35,
            color: Some("blue".into()),
        };
        // No blue pen; 0.3 is 0.05 away, within tolerance.
        assert_eq!(pool().match_hint(&hint).unwrap().id, "fine-black");
    }

    #[test]
    fn out_of_tolerance_width_matches_nothing() {
        let hint = PenHint {
            width_mm: 0.1,
            color: None,
        };
        let narrow = PenPool::new(vec![Pen::new("broad", 0.8, "black")]);
        assert!(narrow.match_hint(&hint).is_none());
    }

    #[test]
    fn tie_broken_by_pool_order() {
        let pool = PenPool::new(vec![
            Pen::new("first", 0.4, "black"),
            Pen::new("second", 0.6, "black"),
        ]);
        let hint = PenHint {
            width_mm: 0.5,
            color: None,
        };
        assert_eq!(pool.match_hint(&hint).unwrap().id, "first");
    }
}
