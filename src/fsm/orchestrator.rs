//! # Orchestrator: the control core of the job lifecycle.
//!
//! The [`Orchestrator`] is the sole owner and mutator of in-memory job state.
//! It applies transitions against the fixed table, consults the arming
//! checklist on gated edges, journals every committed transition **before**
//! mutating state, fires hooks around the commit, and supervises the
//! executor, pipeline, and recording collaborators as cancellable background
//! tasks.
//!
//! ## Transition protocol
//! ```text
//! transition(job, target, cause)
//!   ├─ target == current            → Ok (idempotent no-op)
//!   ├─ edge not in table            → Err(InvalidTransition), nothing journaled
//!   ├─ gated edge: run checklist
//!   │    ├─ blocking failure       → Err(GuardFailed{full set}), nothing journaled
//!   │    └─ soft failures          → collected as job warnings
//!   ├─ entering ARMED              → acquire device advisory lock (or fail)
//!   ├─ fire "before" hooks          (fire-and-forget)
//!   ├─ journal append + fsync       ← commit point
//!   ├─ mutate job, release lock on terminal/disarm, save record
//!   └─ publish TransitionCommitted  → "after" hooks, recording, logging
//! ```
//!
//! Hook failures are logged and flagged on the job but never roll back a
//! journaled transition.
//!
//! ## Concurrency
//! - One `Mutex<Job>` per job: a journal fsync blocks only the committing
//!   job, never other jobs' transitions.
//! - External calls (pipeline, device) run under cancellation tokens;
//!   pause/resume/abort are observed between device calls.
//! - Recording and hooks ride the transition-event channel; the orchestrator
//!   never awaits them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::executor::{ExecOutcome, Executor, PlannedLayer, PlotSignal};
use super::job::{Job, Layer};
use super::shutdown;
use super::state::JobState;
use crate::config::Config;
use crate::device::DeviceLocks;
use crate::error::OrchestratorError;
use crate::estimate::{
    CalibrationStore, Estimate, PathFeatures, TravelMode, extract,
};
use crate::events::{Bus, Event, EventKind};
use crate::geometry::Drawing;
use crate::guards::{
    Checklist, DeviceAvailable, DeviceIdle, DriverMap, Guard, GuardContext, GuardResult,
    PlanPresent,
};
use crate::hooks::{HookContext, HookDispatcher, HookPhase};
use crate::journal::{Journal, JournalEntry, RecordStore, recover_all};
use crate::pens::{assign_pens, is_multi_pen, order_layers};
use crate::pipeline::PipelineRunner;
use crate::record::{Recorder, RecordingSupervisor};
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

/// Handle to a running execution task.
struct ExecutionHandle {
    control: watch::Sender<PlotSignal>,
    abort: CancellationToken,
    join: JoinHandle<()>,
}

/// The control core. Construct with [`Orchestrator::new`], then call
/// [`Orchestrator::recover`] before accepting commands.
pub struct Orchestrator {
    config: Config,
    journal: Journal,
    records: RecordStore,
    calibration: Mutex<CalibrationStore>,
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>,
    seqs: Mutex<HashMap<Uuid, u64>>,
    drawings: RwLock<HashMap<Uuid, Drawing>>,
    optimized: RwLock<HashMap<Uuid, Drawing>>,
    locks: Arc<DeviceLocks>,
    drivers: Arc<DriverMap>,
    pipeline: Arc<dyn PipelineRunner>,
    checklist: Checklist,
    hooks: Arc<HookDispatcher>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    executions: Mutex<HashMap<Uuid, ExecutionHandle>>,
    inflight: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown_token: CancellationToken,
    weak_self: std::sync::OnceLock<std::sync::Weak<Orchestrator>>,
}

impl Orchestrator {
    /// Builds the orchestrator and wires the event listener.
    ///
    /// Must run inside a tokio runtime: the listener and subscriber workers
    /// are spawned here. Built-in arming guards (`plan-present`,
    /// `device-idle`, `device-available`) are installed ahead of
    /// `user_guards`.
    pub fn new(
        config: Config,
        drivers: DriverMap,
        pipeline: Arc<dyn PipelineRunner>,
        recorder: Arc<dyn Recorder>,
        user_guards: Vec<Arc<dyn Guard>>,
    ) -> Result<Arc<Self>, OrchestratorError> {
        let bus = Bus::new(config.bus_capacity_clamped());
        let journal = Journal::open(&config.journal_dir)?;
        let records = RecordStore::open(&config.records_dir)?;
        let calibration = CalibrationStore::open(&config.calibration_path)?;
        let locks = Arc::new(DeviceLocks::new());
        let drivers = Arc::new(drivers);
        let hooks = Arc::new(HookDispatcher::new(config.hooks.clone(), bus.clone()));

        let mut checklist = Checklist::default()
            .with(Arc::new(PlanPresent))
            .with(Arc::new(DeviceIdle::new(Arc::clone(&drivers))))
            .with(Arc::new(DeviceAvailable::new(Arc::clone(&locks))));
        for guard in user_guards {
            checklist = checklist.with(guard);
        }

        let subscribers: Vec<Arc<dyn Subscribe>> = vec![
            Arc::new(LogWriter),
            Arc::clone(&hooks) as Arc<dyn Subscribe>,
            Arc::new(RecordingSupervisor::new(recorder, bus.clone())),
        ];
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        let orchestrator = Arc::new(Self {
            config,
            journal,
            records,
            calibration: Mutex::new(calibration),
            jobs: RwLock::new(HashMap::new()),
            seqs: Mutex::new(HashMap::new()),
            drawings: RwLock::new(HashMap::new()),
            optimized: RwLock::new(HashMap::new()),
            locks,
            drivers,
            pipeline,
            checklist,
            hooks,
            bus,
            subs,
            executions: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
            weak_self: std::sync::OnceLock::new(),
        });
        let _ = orchestrator.weak_self.set(Arc::downgrade(&orchestrator));
        orchestrator.spawn_listener();
        Ok(orchestrator)
    }

    /// Strong handle to self, for tasks that outlive the current borrow.
    fn arc(&self) -> Arc<Self> {
        self.weak_self
            .get()
            .and_then(std::sync::Weak::upgrade)
            .expect("orchestrator is alive while a borrow exists")
    }

    /// Event bus, for additional observers.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Forwards bus events to the subscriber set and applies warning flags.
    fn spawn_listener(&self) {
        let mut rx = self.bus.subscribe();
        let me = self.arc();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = me.shutdown_token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => {
                            me.subs.emit(&ev);
                            me.apply_degradations(&ev).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "orchestrator listener lagged");
                            continue;
                        }
                    }
                }
            }
        });
    }

    /// Side-effect failures become job warnings; they never change state.
    async fn apply_degradations(&self, ev: &Event) {
        let message = match ev.kind {
            EventKind::HookFailed => {
                format!("hook-failed: {}", ev.hook.as_deref().unwrap_or("?"))
            }
            EventKind::RecordingFailed => "recording-degraded".to_string(),
            _ => return,
        };
        let Some(id) = ev.job.as_deref().and_then(|j| j.parse::<Uuid>().ok()) else {
            return;
        };
        if let Some(job_arc) = self.jobs.read().await.get(&id).cloned() {
            let mut job = job_arc.lock().await;
            job.warn(message);
            if let Err(e) = self.records.save(&job) {
                warn!(job = %id, error = %e, "record save failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Replays the journal and reinstates every job **before** any new
    /// command is accepted.
    ///
    /// Jobs found in `PLOTTING` died mid-execution. They are not auto
    /// resumed: if the device reports itself parked and idle the job is
    /// parked in `PAUSED` awaiting a manual `resume` or `abort`; otherwise
    /// it is driven to `FAILED` with cause `incomplete-execution-on-restart`.
    pub async fn recover(&self) -> Result<(), OrchestratorError> {
        let recovered = recover_all(&self.journal, &self.records)?;

        for item in recovered {
            let id = item.job.id;
            let state = item.job.state;
            let device_id = item.job.device_id.clone();
            let job_id_str = item.job.id_str();

            self.seqs.lock().await.insert(id, item.last_seq + 1);
            self.jobs
                .write()
                .await
                .insert(id, Arc::new(Mutex::new(item.job)));
            if let Some(drawing) = self.records.load_drawing(id)? {
                self.optimized.write().await.insert(id, drawing);
            }
            if item.truncated {
                self.bus
                    .publish(Event::now(EventKind::JournalTruncated).with_job(job_id_str.clone()));
            }

            match state {
                JobState::Armed | JobState::Paused => {
                    self.locks.try_acquire(&device_id, &job_id_str).await;
                }
                JobState::Plotting => {
                    self.locks.try_acquire(&device_id, &job_id_str).await;
                    self.settle_interrupted(id, &device_id).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Applies the restart policy for a job that died mid-`PLOTTING`.
    async fn settle_interrupted(
        &self,
        id: Uuid,
        device_id: &str,
    ) -> Result<(), OrchestratorError> {
        let parked_idle = match self.drivers.get(device_id) {
            Some(driver) => driver
                .report_status(&self.shutdown_token.child_token())
                .await
                .map(|s| s.is_safe())
                .unwrap_or(false),
            None => false,
        };

        if parked_idle {
            self.transition_inner(
                id,
                JobState::Paused,
                "awaiting-manual-resume",
                Value::Null,
                |job| job.warn("awaiting-manual-resume"),
            )
            .await?;
        } else {
            self.transition_inner(
                id,
                JobState::Failed,
                "incomplete-execution-on-restart",
                Value::Null,
                |_: &mut Job| {},
            )
            .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Command surface
    // ------------------------------------------------------------------

    /// Creates a job in `NEW` for a registered device. The drawing geometry
    /// is cached for analysis; only its feature summary ever persists.
    pub async fn create_job(
        &self,
        device_id: &str,
        source: impl Into<std::path::PathBuf>,
        drawing: Drawing,
    ) -> Result<Uuid, OrchestratorError> {
        if self.config.device(device_id).is_none() {
            return Err(OrchestratorError::UnknownDevice {
                id: device_id.to_string(),
            });
        }
        let job = Job::new(device_id, source);
        let id = job.id;
        self.records.save(&job)?;
        self.jobs
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(job)));
        self.drawings.write().await.insert(id, drawing);
        Ok(id)
    }

    /// Re-supplies raw geometry for a job whose in-memory cache was lost
    /// (process restart before optimization persisted it).
    pub async fn attach_drawing(
        &self,
        id: Uuid,
        drawing: Drawing,
    ) -> Result<(), OrchestratorError> {
        let _ = self.job_arc(id).await?;
        self.drawings.write().await.insert(id, drawing);
        Ok(())
    }

    /// Performs the work of the job's next stage and advances it one state.
    pub async fn advance(&self, id: Uuid) -> Result<JobState, OrchestratorError> {
        match self.state_of(id).await? {
            JobState::New => self.transition(id, JobState::Queued, "submit").await,
            JobState::Queued => self.analyze(id).await,
            JobState::Analyzed => self.optimize(id).await,
            JobState::Optimized => self.transition(id, JobState::Ready, "prepared").await,
            JobState::Ready => self.transition(id, JobState::Armed, "arm").await,
            JobState::Armed => self.start_plotting(id).await,
            actual => Err(OrchestratorError::WrongState {
                op: "advance".into(),
                actual,
            }),
        }
    }

    /// Suspends an executing job: journaled `PLOTTING → PAUSED`, then the
    /// executor lifts the pen at its next safe point.
    pub async fn pause(&self, id: Uuid) -> Result<(), OrchestratorError> {
        self.transition(id, JobState::Paused, "pause").await?;
        if let Some(handle) = self.executions.lock().await.get(&id) {
            let _ = handle.control.send(PlotSignal::Pause);
        }
        Ok(())
    }

    /// Resumes a paused job. For a job recovered after a crash the executor
    /// is rebuilt from the persisted plan and geometry; the plan re-executes
    /// from the beginning, which is why resumption is manual.
    pub async fn resume(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let has_live_executor = self.executions.lock().await.contains_key(&id);
        if has_live_executor {
            self.transition(id, JobState::Plotting, "resume").await?;
            if let Some(handle) = self.executions.lock().await.get(&id) {
                let _ = handle.control.send(PlotSignal::Run);
            }
            return Ok(());
        }

        // Recovered job: rebuild the execution from durable state.
        let layers = self.build_planned_layers(id).await?;
        self.transition(id, JobState::Plotting, "resume").await?;
        self.spawn_execution(id, layers).await;
        Ok(())
    }

    /// Aborts a job from any abortable state. For an executing job the
    /// safety sequence (pen up, park) always runs before the job is marked
    /// `ABORTED`.
    pub async fn abort(&self, id: Uuid) -> Result<(), OrchestratorError> {
        if let Some(token) = self.inflight.lock().await.get(&id) {
            token.cancel();
        }

        let handle = self.executions.lock().await.remove(&id);
        if let Some(handle) = handle {
            handle.abort.cancel();
            if tokio::time::timeout(self.config.grace, handle.join)
                .await
                .is_err()
            {
                warn!(job = %id, "executor did not stop within grace");
            }
            // The execution wrapper performed the terminal transition.
            Ok(())
        } else {
            self.transition(id, JobState::Aborted, "abort").await.map(|_| ())
        }
    }

    /// Computes (and stores) the estimate for the job's current stage:
    /// nearest-neighbor travel before optimization, exact travel after.
    pub async fn estimate(&self, id: Uuid) -> Result<crate::estimate::EstimateSet, OrchestratorError> {
        let job_arc = self.job_arc(id).await?;

        let optimized = self.optimized.read().await.get(&id).cloned();
        let raw = self.drawings.read().await.get(&id).cloned();

        let mut job = job_arc.lock().await;
        match (&optimized, &raw) {
            (Some(drawing), _) => {
                let estimate = self.estimate_for(&job, drawing, TravelMode::FileOrder).await;
                job.estimates.post = Some(estimate);
            }
            (None, Some(drawing)) => {
                let estimate = self
                    .estimate_for(&job, drawing, TravelMode::NearestNeighbor)
                    .await;
                job.estimates.pre = Some(estimate);
            }
            (None, None) => {}
        }
        if let Err(e) = self.records.save(&job) {
            warn!(job = %id, error = %e, "record save failed");
        }
        Ok(job.estimates)
    }

    /// Runs the assignment optimizer: maps every visible layer to a pen and
    /// orders execution to minimize pen swaps.
    ///
    /// Legal while the job is `ANALYZED` or `OPTIMIZED`. Explicit re-trigger
    /// only: a changed pen pool takes effect the next time this is called.
    pub async fn plan(&self, id: Uuid) -> Result<crate::pens::PlotPlan, OrchestratorError> {
        let job_arc = self.job_arc(id).await?;
        let drawing = self.best_drawing(id).await;
        let mut job = job_arc.lock().await;

        if !matches!(job.state, JobState::Analyzed | JobState::Optimized) {
            return Err(OrchestratorError::WrongState {
                op: "plan".into(),
                actual: job.state,
            });
        }
        if job.layers.is_empty() {
            return Err(OrchestratorError::WrongState {
                op: "plan (no layers)".into(),
                actual: job.state,
            });
        }

        let mut layers = job.layers.clone();
        assign_pens(&mut layers, &self.config.pens, &self.config.pen_map)?;

        if let Some(drawing) = &drawing {
            refresh_layer_features(&mut layers, drawing, travel_mode_for(&job));
        }
        let plan = order_layers(&layers);
        for &idx in &plan.order {
            layers[idx].planned = true;
        }

        job.layers = layers;
        job.plan = Some(plan.clone());
        // Ordering may have changed; the post estimate is stale until
        // recomputed.
        job.estimates.post = None;
        job.updated_at = Utc::now();
        if let Err(e) = self.records.save(&job) {
            warn!(job = %id, error = %e, "record save failed");
        }
        Ok(plan)
    }

    /// Current state of a job.
    pub async fn state_of(&self, id: Uuid) -> Result<JobState, OrchestratorError> {
        Ok(self.job_arc(id).await?.lock().await.state)
    }

    /// Full job record snapshot.
    pub async fn job(&self, id: Uuid) -> Result<Job, OrchestratorError> {
        Ok(self.job_arc(id).await?.lock().await.clone())
    }

    /// Ids of all known jobs.
    pub async fn job_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.jobs.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Applies one transition under the full protocol. See the module docs.
    pub async fn transition(
        &self,
        id: Uuid,
        target: JobState,
        cause: &str,
    ) -> Result<JobState, OrchestratorError> {
        self.transition_inner(id, target, cause, Value::Null, |_: &mut Job| {}).await
    }

    async fn transition_inner(
        &self,
        id: Uuid,
        target: JobState,
        cause: &str,
        extra: Value,
        apply: impl FnOnce(&mut Job) + Send,
    ) -> Result<JobState, OrchestratorError> {
        let job_arc = self.job_arc(id).await?;
        let mut job = job_arc.lock().await;

        // Idempotent: requesting the state the job is already in succeeds
        // without journaling anything.
        if job.state == target {
            return Ok(target);
        }

        if !job.state.can_transition_to(target) {
            let err = OrchestratorError::InvalidTransition {
                from: job.state,
                to: target,
            };
            self.bus.publish(
                Event::now(EventKind::TransitionRejected)
                    .with_job(job.id_str())
                    .with_error(err.to_string()),
            );
            return Err(err);
        }

        let mut soft_failures: Vec<GuardResult> = Vec::new();
        if job.state.requires_guards(target) {
            let ctx = GuardContext {
                job: &job,
                token: self.shutdown_token.child_token(),
            };
            let results = self.checklist.evaluate(&ctx).await;
            let failing: Vec<GuardResult> =
                results.into_iter().filter(|r| !r.passed).collect();
            if failing.iter().any(GuardResult::is_blocking_failure) {
                let err = OrchestratorError::GuardFailed { failures: failing };
                self.bus.publish(
                    Event::now(EventKind::TransitionRejected)
                        .with_job(job.id_str())
                        .with_error(err.to_string()),
                );
                return Err(err);
            }
            soft_failures = failing;
        }

        let mut lock_acquired = false;
        if target == JobState::Armed {
            if !self.locks.try_acquire(&job.device_id, &job.id_str()).await {
                let holder = self.locks.holder(&job.device_id).await.unwrap_or_default();
                return Err(OrchestratorError::GuardFailed {
                    failures: vec![GuardResult::fail(
                        "device-available",
                        crate::guards::Severity::Blocking,
                        format!("device {} held by job {holder}", job.device_id),
                    )],
                });
            }
            lock_acquired = true;
        }

        self.hooks.fire(
            HookPhase::Before,
            &HookContext {
                job_id: job.id_str(),
                job_path: job.source.display().to_string(),
                state: target,
                error: None,
            },
        );

        let seq = {
            let mut seqs = self.seqs.lock().await;
            let next = seqs.entry(id).or_insert(0);
            let seq = *next;
            *next += 1;
            seq
        };
        let mut payload = match extra {
            Value::Null => json!({ "cause": cause }),
            Value::Object(mut map) => {
                map.insert("cause".into(), Value::String(cause.into()));
                Value::Object(map)
            }
            other => json!({ "cause": cause, "detail": other }),
        };
        if seq == 0 {
            payload["device_id"] = Value::String(job.device_id.clone());
            payload["source"] = Value::String(job.source.display().to_string());
            payload["created_at"] = Value::String(job.created_at.to_rfc3339());
        }

        let entry = JournalEntry::new(seq, id, job.state, target, payload);
        if let Err(e) = self.journal.append(&entry) {
            if lock_acquired {
                self.locks.release(&job.device_id, &job.id_str()).await;
            }
            return Err(e);
        }

        // Commit point passed: the entry is durable, now apply in memory.
        let from = job.state;
        job.state = target;
        job.updated_at = Utc::now();
        for failure in &soft_failures {
            job.warn(format!("soft-guard: {}", failure.name));
            self.bus.publish(
                Event::now(EventKind::GuardSoftFailed)
                    .with_job(job.id_str())
                    .with_error(format!(
                        "{}: {}",
                        failure.name,
                        failure.detail.as_deref().unwrap_or("")
                    )),
            );
        }
        apply(&mut job);

        if target.is_terminal() || (from == JobState::Armed && target == JobState::Ready) {
            self.locks.release(&job.device_id, &job.id_str()).await;
        }

        if let Err(e) = self.records.save(&job) {
            warn!(job = %id, error = %e, "record save failed");
        }

        self.bus.publish(
            Event::now(EventKind::TransitionCommitted)
                .with_job(job.id_str())
                .with_states(from, target)
                .with_cause(cause.to_string())
                .with_path(job.source.display().to_string()),
        );
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Stage work
    // ------------------------------------------------------------------

    /// Layer detection and the pre-optimization estimate.
    async fn analyze(&self, id: Uuid) -> Result<JobState, OrchestratorError> {
        let drawing = self
            .drawings
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::WrongState {
                op: "analyze (drawing not loaded; attach_drawing first)".into(),
                actual: JobState::Queued,
            })?;

        let mut layers: Vec<Layer> = drawing.layers.iter().map(Layer::from_geometry).collect();
        refresh_layer_features(&mut layers, &drawing, TravelMode::NearestNeighbor);

        let job_arc = self.job_arc(id).await?;
        let estimate = {
            let job = job_arc.lock().await;
            let features = total_features(&drawing, TravelMode::NearestNeighbor);
            self.default_estimate(&job, features).await
        };

        self.transition_inner(
            id,
            JobState::Analyzed,
            "analysis",
            json!({
                "layers": layers.len(),
                "multi_pen": is_multi_pen(&layers),
                "pre_estimate_secs": estimate.seconds,
                "uncalibrated": estimate.uncalibrated,
            }),
            move |job| {
                job.layers = layers;
                job.estimates.pre = Some(estimate);
            },
        )
        .await
    }

    /// Runs the external optimization pipeline (cancellable) and computes the
    /// post-optimization estimate.
    async fn optimize(&self, id: Uuid) -> Result<JobState, OrchestratorError> {
        let source = self.job_arc(id).await?.lock().await.source.clone();

        let token = self.shutdown_token.child_token();
        self.inflight.lock().await.insert(id, token.clone());
        let result = self
            .pipeline
            .optimize(&source, &self.config.optimize, &token)
            .await;
        self.inflight.lock().await.remove(&id);
        let drawing = result?;

        self.records.save_drawing(id, &drawing)?;
        self.optimized.write().await.insert(id, drawing.clone());

        // Estimate against exact-travel features, not the stale
        // nearest-neighbor ones from analysis.
        let job_arc = self.job_arc(id).await?;
        let (estimate, layers) = {
            let job = job_arc.lock().await;
            let mut probe = job.clone();
            refresh_layer_features(&mut probe.layers, &drawing, TravelMode::FileOrder);
            let estimate = self
                .estimate_for(&probe, &drawing, TravelMode::FileOrder)
                .await;
            (estimate, probe.layers)
        };

        self.transition_inner(
            id,
            JobState::Optimized,
            "optimized",
            json!({
                "post_estimate_secs": estimate.seconds,
                "uncalibrated": estimate.uncalibrated,
            }),
            move |job| {
                job.layers = layers;
                job.estimates.post = Some(estimate);
            },
        )
        .await
    }

    /// Snapshots the plan into executor input and starts the device loop.
    async fn start_plotting(&self, id: Uuid) -> Result<JobState, OrchestratorError> {
        let layers = self.build_planned_layers(id).await?;
        let state = self.transition(id, JobState::Plotting, "start").await?;
        self.spawn_execution(id, layers).await;
        Ok(state)
    }

    /// Builds the per-layer execution snapshot from plan + geometry.
    async fn build_planned_layers(
        &self,
        id: Uuid,
    ) -> Result<Vec<PlannedLayer>, OrchestratorError> {
        let job = self.job_arc(id).await?.lock().await.clone();
        let plan = job.plan.clone().ok_or(OrchestratorError::NotResumable {
            detail: "no execution plan".into(),
        })?;
        let drawing = self
            .best_drawing(id)
            .await
            .ok_or(OrchestratorError::NotResumable {
                detail: "no geometry available".into(),
            })?;
        let device =
            self.config
                .device(&job.device_id)
                .ok_or_else(|| OrchestratorError::UnknownDevice {
                    id: job.device_id.clone(),
                })?;

        let mut planned = Vec::with_capacity(plan.order.len());
        for &idx in &plan.order {
            let layer = &job.layers[idx];
            let pen_id = layer
                .assigned_pen
                .clone()
                .ok_or_else(|| OrchestratorError::NoCompatiblePen {
                    layer: layer.name.clone(),
                })?;
            let speed = self
                .config
                .pens
                .get(&pen_id)
                .map(|p| p.speed_cap_mm_s.min(device.draw_speed_mm_s))
                .unwrap_or(device.draw_speed_mm_s);
            let paths = drawing
                .layers
                .iter()
                .find(|g| g.name == layer.name)
                .map(|g| g.paths.clone())
                .unwrap_or_default();
            planned.push(PlannedLayer {
                name: layer.name.clone(),
                pen: pen_id,
                speed_mm_s: speed,
                paths,
            });
        }
        Ok(planned)
    }

    /// Spawns the executor plus its pen-swap handler, tracked for abort.
    async fn spawn_execution(&self, id: Uuid, layers: Vec<PlannedLayer>) {
        let job = match self.job_arc(id).await {
            Ok(arc) => arc.lock().await.clone(),
            Err(_) => return,
        };
        let Some(driver) = self.drivers.get(&job.device_id).cloned() else {
            let _ = self
                .transition_inner(
                    id,
                    JobState::Failed,
                    "device-fault",
                    json!({"error": format!("no driver for device {}", job.device_id)}),
                    |_: &mut Job| {},
                )
                .await;
            return;
        };

        let (control_tx, control_rx) = watch::channel(PlotSignal::Run);
        let abort = self.shutdown_token.child_token();
        let (swap_tx, mut swap_rx) = mpsc::channel::<String>(2);

        let swap_handler = self.arc();
        tokio::spawn(async move {
            while let Some(_pen) = swap_rx.recv().await {
                if let Err(e) = swap_handler.pause(id).await {
                    warn!(job = %id, error = %e, "pen-swap pause failed");
                }
            }
        });

        let executor = Executor::new(
            job.id_str(),
            driver,
            layers,
            control_rx,
            abort.clone(),
            swap_tx,
            self.bus.clone(),
        );
        let me = self.arc();
        let join = tokio::spawn(async move {
            let outcome = executor.run().await;
            me.finish_execution(id, outcome).await;
        });

        self.executions.lock().await.insert(
            id,
            ExecutionHandle {
                control: control_tx,
                abort,
                join,
            },
        );
    }

    /// Applies the executor's outcome as the job's terminal transition.
    async fn finish_execution(&self, id: Uuid, outcome: ExecOutcome) {
        self.executions.lock().await.remove(&id);
        match outcome {
            ExecOutcome::Completed { actual_secs } => {
                let committed = self
                    .transition_inner(
                        id,
                        JobState::Completed,
                        "finished",
                        json!({ "actual_secs": actual_secs }),
                        move |job| job.estimates.actual_secs = Some(actual_secs),
                    )
                    .await;
                if committed.is_ok() {
                    self.fold_calibration(id, actual_secs).await;
                }
            }
            ExecOutcome::Aborted => {
                let _ = self.transition(id, JobState::Aborted, "abort").await;
            }
            ExecOutcome::Faulted { detail } => {
                let _ = self
                    .transition_inner(
                        id,
                        JobState::Failed,
                        "device-fault",
                        json!({ "error": detail }),
                        |_: &mut Job| {},
                    )
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Estimation & calibration
    // ------------------------------------------------------------------

    /// Estimate with the pool's default pen coefficients (pre-assignment).
    async fn default_estimate(&self, job: &Job, features: PathFeatures) -> Estimate {
        let pen_id = self
            .config
            .pens
            .default_pen()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| "default".into());
        let calibration = self.calibration.lock().await;
        let coeffs = calibration.coefficients_for(&job.device_id, &pen_id);
        Estimate::compute(features, &coeffs)
    }

    /// Estimate respecting the plan: per-pen coefficients summed over pen
    /// groups; falls back to the default pen when no plan exists yet.
    async fn estimate_for(&self, job: &Job, drawing: &Drawing, mode: TravelMode) -> Estimate {
        if job.plan.is_none() {
            return self.default_estimate(job, total_features(drawing, mode)).await;
        }

        let calibration = self.calibration.lock().await;
        let mut seconds = 0.0;
        let mut uncalibrated = false;
        let mut total = PathFeatures::default();
        for (pen_id, features) in features_by_pen(job, drawing, mode) {
            let coeffs = calibration.coefficients_for(&job.device_id, &pen_id);
            seconds += coeffs.predict(&features);
            uncalibrated |= !coeffs.is_calibrated();
            total = total.add(&features);
        }
        Estimate {
            seconds,
            uncalibrated,
            features: total,
            at: Utc::now(),
        }
    }

    /// Folds a completed job's actual duration into per-(device, pen)
    /// coefficients, splitting the duration across pens by predicted share.
    async fn fold_calibration(&self, id: Uuid, actual_secs: f64) {
        let Ok(job_arc) = self.job_arc(id).await else {
            return;
        };
        let job = job_arc.lock().await.clone();
        let Some(drawing) = self.best_drawing(id).await else {
            return;
        };

        let groups = features_by_pen(&job, &drawing, TravelMode::FileOrder);
        if groups.is_empty() {
            return;
        }

        let mut calibration = self.calibration.lock().await;
        let predictions: Vec<(String, PathFeatures, f64)> = groups
            .into_iter()
            .map(|(pen, features)| {
                let predicted = calibration
                    .coefficients_for(&job.device_id, &pen)
                    .predict(&features);
                (pen, features, predicted)
            })
            .collect();
        let total_predicted: f64 = predictions.iter().map(|(_, _, p)| p).sum();

        for (pen, features, predicted) in predictions {
            let share = if total_predicted > 0.0 {
                actual_secs * predicted / total_predicted
            } else {
                actual_secs / 1.0f64.max(job.planned_pens().len() as f64)
            };
            if let Err(e) = calibration.record_sample(&job.device_id, &pen, &features, share) {
                warn!(job = %id, pen, error = %e, "calibration update failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Blocks until an OS termination signal, then safety-aborts everything.
    pub async fn run_until_signal(&self) -> std::io::Result<()> {
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await;
        Ok(())
    }

    /// Aborts all active executions (pen up + park first) and stops the
    /// runtime tasks.
    pub async fn shutdown(&self) {
        self.bus.publish(Event::now(EventKind::ShutdownRequested));

        let ids: Vec<Uuid> = self.executions.lock().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.abort(id).await {
                warn!(job = %id, error = %e, "shutdown abort failed");
            }
        }
        self.shutdown_token.cancel();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn job_arc(&self, id: Uuid) -> Result<Arc<Mutex<Job>>, OrchestratorError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownJob { id: id.to_string() })
    }

    /// Optimized geometry when available, else the raw drawing.
    async fn best_drawing(&self, id: Uuid) -> Option<Drawing> {
        if let Some(d) = self.optimized.read().await.get(&id).cloned() {
            return Some(d);
        }
        self.drawings.read().await.get(&id).cloned()
    }
}

/// Travel mode matching the job's progress: exact once optimized.
fn travel_mode_for(job: &Job) -> TravelMode {
    if job.estimates.post.is_some() || job.state == JobState::Optimized {
        TravelMode::FileOrder
    } else {
        TravelMode::NearestNeighbor
    }
}

/// Whole-drawing features over visible layers.
fn total_features(drawing: &Drawing, mode: TravelMode) -> PathFeatures {
    let paths: Vec<_> = drawing
        .visible_layers()
        .flat_map(|l| l.paths.iter().cloned())
        .collect();
    extract(&paths, mode)
}

/// Recomputes each tracked layer's features from matching geometry.
fn refresh_layer_features(layers: &mut [Layer], drawing: &Drawing, mode: TravelMode) {
    for layer in layers.iter_mut() {
        if let Some(geometry) = drawing.layers.iter().find(|g| g.name == layer.name) {
            layer.features = Some(extract(&geometry.paths, mode));
        }
    }
}

/// Per-pen feature aggregation over the planned order.
fn features_by_pen(job: &Job, drawing: &Drawing, mode: TravelMode) -> Vec<(String, PathFeatures)> {
    let Some(plan) = &job.plan else {
        return Vec::new();
    };
    let mut groups: Vec<(String, PathFeatures)> = Vec::new();
    for &idx in &plan.order {
        let Some(layer) = job.layers.get(idx) else {
            continue;
        };
        let Some(pen) = layer.assigned_pen.clone() else {
            continue;
        };
        let features = layer.features.unwrap_or_else(|| {
            drawing
                .layers
                .iter()
                .find(|g| g.name == layer.name)
                .map(|g| extract(&g.paths, mode))
                .unwrap_or_default()
        });
        match groups.iter_mut().find(|(p, _)| *p == pen) {
            Some((_, total)) => *total = total.add(&features),
            None => groups.push((pen, features)),
        }
    }
    groups
}
