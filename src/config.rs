//! # Runtime configuration: registry snapshots and storage locations.
//!
//! [`Config`] is a **read-only snapshot**: device registry, pen pool, paper
//! and optimization defaults, hook bindings, storage paths. Components
//! receive it (or pieces of it) by value at defined points — nothing reads
//! mutable global state. Swapping registries means building a new snapshot
//! and handing it to a new orchestrator at a reload point.
//!
//! ## Field semantics
//! - `bus_capacity`: event ring buffer size (min 1; clamped by the bus).
//! - `grace`: how long shutdown waits for executors to finish their safety
//!   sequence before giving up.
//! - `pen_map`: explicit layer-name → pen-id assignments that win over hint
//!   matching.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::device::Device;
use crate::hooks::HookBinding;
use crate::pens::PenPool;
use crate::pipeline::OptimizeOptions;

/// Read-only runtime configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    /// Devices known to this orchestrator, keyed by [`Device::id`].
    pub devices: Vec<Device>,
    /// Pens physically available.
    pub pens: PenPool,
    /// Explicit layer-name → pen-id assignments (win over hint matching).
    pub pen_map: HashMap<String, String>,
    /// Paper/margin/preset parameters handed to the optimization pipeline.
    pub optimize: OptimizeOptions,
    /// Side-effect actions bound to state transitions.
    pub hooks: Vec<HookBinding>,
    /// Directory of per-job journal files.
    pub journal_dir: PathBuf,
    /// Directory of per-job record files.
    pub records_dir: PathBuf,
    /// Calibration store file.
    pub calibration_path: PathBuf,
    /// Event bus ring buffer capacity.
    pub bus_capacity: usize,
    /// Maximum wait for executors to finish their safety sequence on
    /// shutdown.
    pub grace: Duration,
}

impl Config {
    /// Builds a config rooted at a data directory:
    /// `<data>/journal`, `<data>/records`, `<data>/calibration.json`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            devices: Vec::new(),
            pens: PenPool::default(),
            pen_map: HashMap::new(),
            optimize: OptimizeOptions::default(),
            hooks: Vec::new(),
            journal_dir: data_dir.join("journal"),
            records_dir: data_dir.join("records"),
            calibration_path: data_dir.join("calibration.json"),
            bus_capacity: 1024,
            grace: Duration::from_secs(30),
        }
    }

    /// Registers a device; builder-style.
    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    /// Sets the pen pool; builder-style.
    pub fn with_pens(mut self, pens: PenPool) -> Self {
        self.pens = pens;
        self
    }

    /// Appends a hook binding; builder-style.
    pub fn with_hook(mut self, binding: HookBinding) -> Self {
        self.hooks.push(binding);
        self
    }

    /// Looks a device up by id.
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_roots_storage_paths() {
        let cfg = Config::at("/var/lib/plots");
        assert_eq!(cfg.journal_dir, PathBuf::from("/var/lib/plots/journal"));
        assert_eq!(cfg.records_dir, PathBuf::from("/var/lib/plots/records"));
        assert_eq!(
            cfg.calibration_path,
            PathBuf::from("/var/lib/plots/calibration.json")
        );
    }

    #[test]
    fn device_lookup_by_id() {
        let cfg = Config::at("/tmp/x").with_device(Device::new("axi-1", "/dev/ttyUSB0"));
        assert!(cfg.device("axi-1").is_some());
        assert!(cfg.device("axi-2").is_none());
    }
}
