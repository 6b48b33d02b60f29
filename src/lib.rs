//! # plotvisor
//!
//! **Plotvisor** is a crash-recoverable orchestration library for pen-plotter
//! jobs.
//!
//! It queues vector drawings, routes them through an external
//! path-optimization pipeline, predicts plot duration from calibrated
//! per-(device, pen) cost models, assigns drawing layers to physical pens,
//! gates execution behind safety checklists, and drives the device through a
//! journaled finite-state machine while side effects (hooks, video
//! recording) ride a transition-event channel.
//!
//! ## Architecture
//! ```text
//!  create_job ──► ┌─────────────────────────────────────────────────────┐
//!  advance    ──► │  Orchestrator (control core)                        │
//!  pause/...  ──► │  - transition table + arming Checklist (guards)     │
//!                 │  - Journal: fsync before every in-memory mutation   │
//!                 │  - per-device advisory locks                        │
//!                 │  - Estimator + CalibrationStore                     │
//!                 │  - pen assignment optimizer (stable grouping)       │
//!                 └────┬──────────────┬─────────────────┬───────────────┘
//!                      ▼              ▼                 ▼
//!              ┌────────────┐  ┌─────────────┐  ┌──────────────┐
//!              │  Executor  │  │ Pipeline    │  │  Bus (events)│
//!              │ (device    │  │ (external   │  └──────┬───────┘
//!              │  loop,     │  │  process,   │         ▼
//!              │  pausable) │  │  killable)  │   SubscriberSet
//!              └────────────┘  └─────────────┘  ┌──────┼──────────┐
//!                                               ▼      ▼          ▼
//!                                            hooks  recording  logging
//! ```
//!
//! ## Lifecycle
//! ```text
//! NEW → QUEUED → ANALYZED → OPTIMIZED → READY → ARMED → PLOTTING → COMPLETED
//!         │          │                            ▲         │  ▲
//!         │          │ plan() assigns pens,       │         ▼  │
//!         │          │ orders layers              │       PAUSED ──► ABORTED
//!         │          └─ NoCompatiblePen keeps     │
//!         │             the job here              └─ guard-gated (checklist
//!         └─ PipelineFailure is retryable            + device lock)
//! ```
//!
//! Every committed transition is appended to a per-job JSONL journal and
//! fsynced before the in-memory state changes; on restart
//! [`Orchestrator::recover`] replays the journal, repairs a partial trailing
//! record, and settles jobs that died mid-plot (failed unless the device
//! reports itself parked and idle, in which case the operator chooses
//! `resume` or `abort`).
//!
//! ## Example
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use plotvisor::{
//!     Config, Device, Drawing, NoopRecorder, Orchestrator, Pen, PenPool,
//!     ProcessPipeline,
//! };
//!
//! # async fn run(drawing: Drawing, driver: Arc<dyn plotvisor::DeviceDriver>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::at("/var/lib/plotvisor")
//!     .with_device(Device::new("axi-1", "/dev/ttyUSB0"))
//!     .with_pens(PenPool::new(vec![Pen::new("fine-black", 0.3, "black")]));
//!
//! let mut drivers: HashMap<String, Arc<dyn plotvisor::DeviceDriver>> = HashMap::new();
//! drivers.insert("axi-1".into(), driver);
//!
//! let orchestrator = Orchestrator::new(
//!     config,
//!     drivers,
//!     Arc::new(ProcessPipeline::new("/usr/local/bin/path-optimizer")),
//!     Arc::new(NoopRecorder),
//!     Vec::new(),
//! )?;
//! orchestrator.recover().await?;
//!
//! let id = orchestrator.create_job("axi-1", "/drawings/spiral.svg", drawing).await?;
//! orchestrator.advance(id).await?; // QUEUED
//! orchestrator.advance(id).await?; // ANALYZED (+ pre-optimization estimate)
//! orchestrator.plan(id).await?;    // pens assigned, swap-minimal order
//! orchestrator.advance(id).await?; // OPTIMIZED (+ post-optimization estimate)
//! orchestrator.advance(id).await?; // READY
//! orchestrator.advance(id).await?; // ARMED (checklist + device lock)
//! orchestrator.advance(id).await?; // PLOTTING
//! # Ok(()) }
//! ```

mod config;
mod device;
mod error;
mod estimate;
mod events;
mod fsm;
mod geometry;
mod guards;
mod hooks;
mod journal;
mod pens;
mod pipeline;
mod record;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use device::{Device, DeviceDriver, DeviceLocks, DeviceStatus};
pub use error::{ExecutionError, OrchestratorError};
pub use estimate::{
    COEFF_FLOOR, CORNER_ANGLE_DEG, CalibrationCoefficients, CalibrationRecord, CalibrationStore,
    Estimate, EstimateSet, MIN_SAMPLES, PathFeatures, TravelMode, extract,
};
pub use events::{Bus, Event, EventKind};
pub use fsm::{Job, JobState, Layer, Orchestrator, wait_for_shutdown_signal};
pub use geometry::{Drawing, LayerGeometry, PenHint, Point, Polyline};
pub use guards::{
    Checklist, DeviceAvailable, DeviceIdle, DriverMap, Guard, GuardContext, GuardResult,
    PlanPresent, Severity,
};
pub use hooks::{HookAction, HookBinding, HookContext, HookDispatcher, HookPhase, substitute};
pub use journal::{Journal, JournalEntry, JournalReadback, RecordStore, RecoveredJob, recover_all};
pub use pens::{Pen, PenPool, PlotPlan, WIDTH_TOLERANCE_MM, assign_pens, is_multi_pen, order_layers};
pub use pipeline::{OptimizeInstructions, OptimizeOptions, PipelineRunner, ProcessPipeline};
pub use record::{NoopRecorder, Recorder, RecordingSupervisor};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
