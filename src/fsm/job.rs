//! # Job and layer records.
//!
//! A [`Job`] is the unit of orchestration: one drawing queued for one device,
//! owned exclusively by the orchestrator for its whole lifecycle. Layers live
//! in an arena (`Vec<Layer>`) on the job and are referenced by index — the
//! plan's execution order is a list of indices, never back-pointers.
//!
//! The job record is serde-serializable: it is what the durable record store
//! persists, and what `state` queries return. Raw path geometry is **not**
//! part of the record; the orchestrator caches drawings separately and the
//! record only carries the extracted feature summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;
use crate::estimate::{EstimateSet, PathFeatures};
use crate::geometry::{LayerGeometry, PenHint};
use crate::pens::PlotPlan;

/// One drawing layer as tracked by a job.
///
/// Created during analysis, mutated by the assignment optimizer, immutable
/// once the job enters execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name from the source drawing.
    pub name: String,
    /// Stacking index; lower plots first in the naive order.
    pub z_index: u32,
    /// Hidden layers are excluded from assignment and execution.
    pub hidden: bool,
    /// Declared pen characteristics, if annotated.
    pub pen_hint: Option<PenHint>,
    /// Pen chosen by the assignment optimizer. Set if and only if the job
    /// has passed the assignment stage.
    pub assigned_pen: Option<String>,
    /// Per-layer geometry stats (feeds the estimator).
    pub features: Option<PathFeatures>,
    /// Set once the layer is part of a computed plan.
    pub planned: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, z_index: u32) -> Self {
        Self {
            name: name.into(),
            z_index,
            hidden: false,
            pen_hint: None,
            assigned_pen: None,
            features: None,
            planned: false,
        }
    }

    /// Builds the tracked layer from detected geometry.
    pub fn from_geometry(geometry: &LayerGeometry) -> Self {
        Self {
            name: geometry.name.clone(),
            z_index: geometry.z_index,
            hidden: geometry.hidden,
            pen_hint: geometry.pen_hint.clone(),
            assigned_pen: None,
            features: None,
            planned: false,
        }
    }
}

/// A pen-plot job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity.
    pub id: Uuid,
    /// Device this job targets; calibration and locking key.
    pub device_id: String,
    /// Source drawing descriptor.
    pub source: PathBuf,
    /// Current FSM state. Always equals the `to` state of the job's last
    /// journal entry.
    pub state: JobState,
    /// Layer arena; the plan references entries by index.
    pub layers: Vec<Layer>,
    /// Execution plan, once computed.
    pub plan: Option<PlotPlan>,
    /// Pre/post/actual duration estimates.
    pub estimates: EstimateSet,
    /// Soft degradations accumulated along the way (recording unavailable,
    /// soft guard failures, journal truncation).
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job in `NEW` for the given device and source drawing.
    pub fn new(device_id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            source: source.into(),
            state: JobState::New,
            layers: Vec::new(),
            plan: None,
            estimates: EstimateSet::default(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a job skeleton from journal metadata when the record store
    /// has no copy (recovery path).
    pub fn from_recovery(
        id: Uuid,
        device_id: impl Into<String>,
        source: impl Into<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            source: source.into(),
            state: JobState::New,
            layers: Vec::new(),
            plan: None,
            estimates: EstimateSet::default(),
            warnings: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Job id as a string (lock keys, journal file names, event metadata).
    pub fn id_str(&self) -> String {
        self.id.to_string()
    }

    /// True in `COMPLETED`, `ABORTED`, or `FAILED`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Appends a warning, skipping exact duplicates.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Aggregated features over planned layers, if a plan exists.
    pub fn planned_features(&self) -> Option<PathFeatures> {
        let plan = self.plan.as_ref()?;
        let mut total = PathFeatures::default();
        for &idx in &plan.order {
            if let Some(f) = self.layers.get(idx).and_then(|l| l.features.as_ref()) {
                total = total.add(f);
            }
        }
        Some(total)
    }

    /// Pens in plan execution order, deduplicated to consecutive runs.
    pub fn planned_pens(&self) -> Vec<String> {
        let Some(plan) = &self.plan else {
            return Vec::new();
        };
        let mut pens: Vec<String> = Vec::new();
        for &idx in &plan.order {
            if let Some(pen) = self.layers.get(idx).and_then(|l| l.assigned_pen.clone()) {
                if pens.last() != Some(&pen) {
                    pens.push(pen);
                }
            }
        }
        pens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polyline};

    #[test]
    fn new_job_starts_in_new() {
        let job = Job::new("axi-1", "/drawings/spiral.svg");
        assert_eq!(job.state, JobState::New);
        assert!(job.layers.is_empty());
        assert!(job.plan.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn warn_deduplicates() {
        let mut job = Job::new("axi-1", "/d.svg");
        job.warn("recording-degraded");
        job.warn("recording-degraded");
        job.warn("journal-truncated");
        assert_eq!(job.warnings.len(), 2);
    }

    #[test]
    fn layer_from_geometry_copies_hint() {
        let geometry = LayerGeometry::new("detail", 2)
            .with_hint(PenHint {
                width_mm: 0.3,
                color: Some("red".into()),
            })
            .with_paths(vec![Polyline::new(vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
            ])]);
        let layer = Layer::from_geometry(&geometry);
        assert_eq!(layer.name, "detail");
        assert_eq!(layer.z_index, 2);
        assert_eq!(layer.pen_hint.as_ref().unwrap().width_mm, 0.3);
        assert!(layer.assigned_pen.is_none());
        assert!(!layer.planned);
    }

    #[test]
    fn planned_pens_collapses_runs() {
        let mut job = Job::new("axi-1", "/d.svg");
        for (i, pen) in ["A", "A", "B"].iter().enumerate() {
            let mut l = Layer::new(format!("l{i}"), i as u32);
            l.assigned_pen = Some((*pen).to_string());
            job.layers.push(l);
        }
        job.plan = Some(crate::pens::PlotPlan {
            order: vec![0, 1, 2],
            swaps_before: 1,
            swaps_after: 1,
            multi_pen: true,
        });
        assert_eq!(job.planned_pens(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn job_record_roundtrips_through_json() {
        let job = Job::new("axi-1", "/d.svg");
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
