//! # Duration estimates attached to a job.
//!
//! An [`Estimate`] is one evaluation of the linear model against a feature
//! set; [`EstimateSet`] is the pre/post/actual triple a job accumulates as it
//! moves through its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calibration::CalibrationCoefficients;
use super::features::PathFeatures;

/// One duration estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Predicted duration in seconds.
    pub seconds: f64,
    /// True when the `(device, pen)` key had too little history and
    /// system-wide default coefficients were used.
    pub uncalibrated: bool,
    /// Features the estimate was computed from.
    pub features: PathFeatures,
    /// When the estimate was computed.
    pub at: DateTime<Utc>,
}

impl Estimate {
    /// Evaluates the model for the given features and coefficients.
    pub fn compute(features: PathFeatures, coeffs: &CalibrationCoefficients) -> Self {
        Self {
            seconds: coeffs.predict(&features),
            uncalibrated: !coeffs.is_calibrated(),
            features,
            at: Utc::now(),
        }
    }
}

/// Pre-optimization, post-optimization, and actual durations for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateSet {
    /// Estimate over the raw drawing (nearest-neighbor travel).
    pub pre: Option<Estimate>,
    /// Estimate over the optimized drawing (exact travel).
    pub post: Option<Estimate>,
    /// Wall-clock execution duration recorded at completion.
    pub actual_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncalibrated_flag_follows_sample_count() {
        let features = PathFeatures {
            down_len: 100.0,
            travel_len: 10.0,
            lifts: 2,
            corners: 4,
        };
        let mut coeffs = CalibrationCoefficients::default();
        assert!(Estimate::compute(features, &coeffs).uncalibrated);

        for _ in 0..crate::estimate::MIN_SAMPLES {
            coeffs.observe(&features, 5.0);
        }
        assert!(!Estimate::compute(features, &coeffs).uncalibrated);
    }
}
