//! # Per-(device, pen) calibration of the duration model.
//!
//! Duration estimate: `T = a·L_down + b·L_travel + c·N_lifts + d·N_corners`,
//! with coefficients `(a, b, c, d)` looked up per `(device, pen)`. Keys with
//! no history use system-wide defaults and flag the estimate `uncalibrated`.
//!
//! After a job completes with a recorded actual duration, the matching
//! coefficients take a normalized least-mean-squares step toward the new
//! sample. The ridge term in the denominator keeps the update stable at
//! small sample counts, and every coefficient is clamped to a small positive
//! floor — the model never goes negative.
//!
//! ## Rules
//! - Coefficients are only updated from a transition into terminal success.
//! - Too few samples never blocks an estimate; it only keeps the
//!   `uncalibrated` flag set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::features::PathFeatures;
use crate::error::OrchestratorError;

/// Minimum value any coefficient may take after an update.
pub const COEFF_FLOOR: f64 = 1e-6;

/// Samples required before an estimate counts as calibrated.
pub const MIN_SAMPLES: u32 = 3;

/// Ridge term added to the feature norm in the update denominator.
const RIDGE: f64 = 1.0;

/// Fraction of the full normalized step applied per sample.
const STEP: f64 = 0.5;

/// Linear cost-model parameters for one `(device, pen)` key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCoefficients {
    /// Weight of pen-down distance (s/mm).
    pub a: f64,
    /// Weight of pen-up travel distance (s/mm).
    pub b: f64,
    /// Weight per pen lift (s).
    pub c: f64,
    /// Weight per sharp corner (s).
    pub d: f64,
    /// Completed jobs folded into these coefficients.
    pub samples: u32,
    /// Running mean absolute percentage error of past predictions.
    pub mape: f64,
}

impl Default for CalibrationCoefficients {
    /// System-wide defaults used until a key accumulates history.
    fn default() -> Self {
        Self {
            a: 0.01,
            b: 0.005,
            c: 2.0,
            d: 0.1,
            samples: 0,
            mape: 0.0,
        }
    }
}

impl CalibrationCoefficients {
    /// Predicted duration in seconds for the given features.
    pub fn predict(&self, f: &PathFeatures) -> f64 {
        self.a * f.down_len
            + self.b * f.travel_len
            + self.c * f64::from(f.lifts)
            + self.d * f64::from(f.corners)
    }

    /// Folds one completed-job sample into the coefficients.
    ///
    /// Normalized-LMS step: the prediction error is distributed across the
    /// coefficients proportionally to the feature magnitudes, scaled by
    /// `STEP / (RIDGE + ‖x‖²)`. Coefficients are clamped to [`COEFF_FLOOR`]
    /// afterwards. Samples with a non-positive actual duration are ignored.
    pub fn observe(&mut self, f: &PathFeatures, actual_secs: f64) {
        if actual_secs <= 0.0 {
            return;
        }
        let x = [
            f.down_len,
            f.travel_len,
            f64::from(f.lifts),
            f64::from(f.corners),
        ];
        let predicted = self.predict(f);
        let err = actual_secs - predicted;
        let norm_sq: f64 = x.iter().map(|v| v * v).sum();
        let gain = STEP * err / (RIDGE + norm_sq);

        self.a = (self.a + gain * x[0]).max(COEFF_FLOOR);
        self.b = (self.b + gain * x[1]).max(COEFF_FLOOR);
        self.c = (self.c + gain * x[2]).max(COEFF_FLOOR);
        self.d = (self.d + gain * x[3]).max(COEFF_FLOOR);

        self.samples += 1;
        let ape = (err.abs() / actual_secs) * 100.0;
        self.mape += (ape - self.mape) / f64::from(self.samples);
    }

    /// True once enough samples have accumulated for the key.
    pub fn is_calibrated(&self) -> bool {
        self.samples >= MIN_SAMPLES
    }
}

/// One persisted calibration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub device_id: String,
    pub pen_id: String,
    #[serde(flatten)]
    pub coefficients: CalibrationCoefficients,
}

/// Keyed store of calibration coefficients, persisted as a JSON file.
///
/// Lookups for unknown keys return defaults without creating an entry;
/// entries are created on the first observed sample.
#[derive(Debug)]
pub struct CalibrationStore {
    path: PathBuf,
    entries: HashMap<(String, String), CalibrationCoefficients>,
}

impl CalibrationStore {
    /// Opens the store, loading existing records if the file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let path = path.into();
        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let records: Vec<CalibrationRecord> = serde_json::from_str(&data)?;
            records
                .into_iter()
                .map(|r| ((r.device_id, r.pen_id), r.coefficients))
                .collect()
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Coefficients for a key; defaults when the key has no history.
    pub fn coefficients_for(&self, device_id: &str, pen_id: &str) -> CalibrationCoefficients {
        self.entries
            .get(&(device_id.to_string(), pen_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Folds a completed-job sample into the key and persists the store.
    pub fn record_sample(
        &mut self,
        device_id: &str,
        pen_id: &str,
        features: &PathFeatures,
        actual_secs: f64,
    ) -> Result<(), OrchestratorError> {
        let entry = self
            .entries
            .entry((device_id.to_string(), pen_id.to_string()))
            .or_default();
        entry.observe(features, actual_secs);
        self.persist()
    }

    fn persist(&self) -> Result<(), OrchestratorError> {
        let records: Vec<CalibrationRecord> = self
            .entries
            .iter()
            .map(|((device_id, pen_id), coefficients)| CalibrationRecord {
                device_id: device_id.clone(),
                pen_id: pen_id.clone(),
                coefficients: *coefficients,
            })
            .collect();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }

    /// Store file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
