//! # Duration estimation and calibration.
//!
//! This module turns path geometry into duration predictions:
//! - [`extract`], [`PathFeatures`], [`TravelMode`] feature extraction, with
//!   nearest-neighbor travel approximation before optimization and exact
//!   travel after
//! - [`Estimate`], [`EstimateSet`] model evaluations attached to a job
//! - [`CalibrationStore`], [`CalibrationCoefficients`] per-(device, pen)
//!   coefficients fit incrementally from completed jobs
//!
//! ## Quick wiring
//! ```text
//! analysis    ──► extract(NearestNeighbor) ──► Estimate (pre)
//! optimization ─► extract(FileOrder)       ──► Estimate (post)
//! completion  ──► CalibrationStore::record_sample(actual duration)
//! ```

mod calibration;
mod features;
mod model;

pub use calibration::{
    COEFF_FLOOR, CalibrationCoefficients, CalibrationRecord, CalibrationStore, MIN_SAMPLES,
};
pub use features::{CORNER_ANGLE_DEG, PathFeatures, TravelMode, extract};
pub use model::{Estimate, EstimateSet};
