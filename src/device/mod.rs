//! # Device descriptor, driver capability interface, and advisory locks.
//!
//! The physical plotter is an external collaborator: the orchestrator only
//! sees the [`DeviceDriver`] capability trait. Every call takes a
//! [`CancellationToken`] and must return promptly when it fires — the
//! executor's pause/abort latency depends on it.
//!
//! ## Rules
//! - Device access is serialized per device via [`DeviceLocks`], an advisory
//!   lock acquired on arming and released on reaching a terminal state or on
//!   disarm. A busy device surfaces as a blocking guard failure, never a
//!   queue.
//! - [`DeviceDriver::report_status`] must answer whether the device believes
//!   itself idle and parked; recovery decisions depend on it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::geometry::Polyline;

/// A physical plotting device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier (e.g. "axi-1").
    pub id: String,
    /// Port or connection descriptor (e.g. "/dev/ttyUSB0").
    pub port: String,
    /// Default pen-down drawing speed, mm/s. Capped per pen.
    pub draw_speed_mm_s: f64,
    /// Default pen-up travel speed, mm/s.
    pub travel_speed_mm_s: f64,
}

impl Device {
    pub fn new(id: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: port.into(),
            draw_speed_mm_s: 25.0,
            travel_speed_mm_s: 75.0,
        }
    }
}

/// What the driver believes about the machine's current posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// No motion in progress.
    pub idle: bool,
    /// Carriage at the park position with the pen up.
    pub parked: bool,
}

impl DeviceStatus {
    /// Idle and parked: the safe posture recovery requires before offering a
    /// manual resume.
    pub fn is_safe(&self) -> bool {
        self.idle && self.parked
    }
}

/// Capability interface of the physical device driver.
///
/// All methods take a [`CancellationToken`]; implementations must observe it
/// and return [`ExecutionError::Cancelled`] promptly when it fires, leaving
/// the hardware in a safe posture where physically possible.
#[async_trait]
pub trait DeviceDriver: Send + Sync + 'static {
    /// Moves the carriage to the home origin.
    async fn home(&self, token: &CancellationToken) -> Result<(), ExecutionError>;

    /// Raises the pen.
    async fn pen_up(&self, token: &CancellationToken) -> Result<(), ExecutionError>;

    /// Lowers the pen.
    async fn pen_down(&self, token: &CancellationToken) -> Result<(), ExecutionError>;

    /// Draws one polyline at the given pen-down speed.
    async fn plot_path(
        &self,
        path: &Polyline,
        speed_mm_s: f64,
        token: &CancellationToken,
    ) -> Result<(), ExecutionError>;

    /// Reports the driver's belief about the machine posture.
    async fn report_status(&self, token: &CancellationToken)
    -> Result<DeviceStatus, ExecutionError>;

    /// Raises the pen and moves the carriage to the park position.
    async fn park(&self, token: &CancellationToken) -> Result<(), ExecutionError>;
}

/// Per-device advisory locks.
///
/// Only one job may hold a device between arming and its terminal state.
/// Acquisition is idempotent for the holder, and never waits: a busy device
/// is reported immediately so arming fails as a guard violation.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    held: Mutex<HashMap<String, String>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the device for a job. Returns `false` when another job holds
    /// it; re-acquiring by the current holder succeeds.
    pub async fn try_acquire(&self, device_id: &str, job_id: &str) -> bool {
        let mut held = self.held.lock().await;
        match held.get(device_id) {
            Some(holder) => holder == job_id,
            None => {
                held.insert(device_id.to_string(), job_id.to_string());
                true
            }
        }
    }

    /// Releases the device if this job holds it; releasing a lock held by
    /// someone else (or by nobody) is a no-op.
    pub async fn release(&self, device_id: &str, job_id: &str) {
        let mut held = self.held.lock().await;
        if held.get(device_id).is_some_and(|h| h == job_id) {
            held.remove(device_id);
        }
    }

    /// Whether the device is free, or already held by the given job.
    pub async fn available_for(&self, device_id: &str, job_id: &str) -> bool {
        let held = self.held.lock().await;
        held.get(device_id).is_none_or(|h| h == job_id)
    }

    /// Current holder of the device, if any.
    pub async fn holder(&self, device_id: &str) -> Option<String> {
        self.held.lock().await.get(device_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_job_cannot_acquire_held_device() {
        let locks = DeviceLocks::new();
        assert!(locks.try_acquire("axi-1", "job-a").await);
        assert!(!locks.try_acquire("axi-1", "job-b").await);
        // Re-acquisition by the holder is idempotent.
        assert!(locks.try_acquire("axi-1", "job-a").await);
    }

    #[tokio::test]
    async fn release_frees_the_device() {
        let locks = DeviceLocks::new();
        assert!(locks.try_acquire("axi-1", "job-a").await);
        locks.release("axi-1", "job-a").await;
        assert!(locks.try_acquire("axi-1", "job-b").await);
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_noop() {
        let locks = DeviceLocks::new();
        assert!(locks.try_acquire("axi-1", "job-a").await);
        locks.release("axi-1", "job-b").await;
        assert_eq!(locks.holder("axi-1").await.as_deref(), Some("job-a"));
    }

    #[tokio::test]
    async fn availability_reflects_holder() {
        let locks = DeviceLocks::new();
        assert!(locks.available_for("axi-1", "job-a").await);
        locks.try_acquire("axi-1", "job-a").await;
        assert!(locks.available_for("axi-1", "job-a").await);
        assert!(!locks.available_for("axi-1", "job-b").await);
    }
}
