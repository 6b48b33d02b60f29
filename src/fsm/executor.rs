//! # Device execution loop.
//!
//! Drives one armed job through the physical device, observing control
//! signals at safe points so pause/resume/abort latency stays bounded by a
//! single `plot_path` call, never by a whole layer or job.
//!
//! ```text
//! home
//! for each planned layer:
//!   pen differs from the active one?
//!     ├─► pen up + park
//!     ├─► publish PenSwapRequired, request a pause
//!     └─► wait for resume (operator swaps the pen)
//!   for each path:
//!     ├─► checkpoint: abort? → safety sequence, exit
//!     │               paused? → pen up, wait for resume
//!     └─► driver.plot_path(path)
//!   publish LayerPlotted
//! pen up + park
//! ```
//!
//! ## Rules
//! - Abort **always** runs pen-up + park before the outcome is reported;
//!   the orchestrator marks the job aborted only after that sequence.
//! - A device fault attempts the same safety sequence best-effort, then
//!   reports [`ExecOutcome::Faulted`].
//! - All driver calls take the abort token, so a hung device call cannot
//!   outlive an abort.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceDriver;
use crate::error::ExecutionError;
use crate::events::{Bus, Event, EventKind};
use crate::geometry::Polyline;

/// Operator control signal observed between device calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlotSignal {
    Run,
    Pause,
}

/// Immutable snapshot of one layer ready for execution.
#[derive(Debug, Clone)]
pub(crate) struct PlannedLayer {
    pub name: String,
    pub pen: String,
    pub speed_mm_s: f64,
    pub paths: Vec<Polyline>,
}

/// How execution ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExecOutcome {
    Completed { actual_secs: f64 },
    Aborted,
    Faulted { detail: String },
}

/// Executes one job's plan on the device.
pub(crate) struct Executor {
    job_id: String,
    driver: Arc<dyn DeviceDriver>,
    layers: Vec<PlannedLayer>,
    control: watch::Receiver<PlotSignal>,
    abort: CancellationToken,
    swap_tx: mpsc::Sender<String>,
    bus: Bus,
}

impl Executor {
    pub fn new(
        job_id: String,
        driver: Arc<dyn DeviceDriver>,
        layers: Vec<PlannedLayer>,
        control: watch::Receiver<PlotSignal>,
        abort: CancellationToken,
        swap_tx: mpsc::Sender<String>,
        bus: Bus,
    ) -> Self {
        Self {
            job_id,
            driver,
            layers,
            control,
            abort,
            swap_tx,
            bus,
        }
    }

    /// Runs the plan to an outcome. Never panics; never leaves the pen down
    /// on abort or fault (best-effort on fault).
    pub async fn run(mut self) -> ExecOutcome {
        let started = Instant::now();
        match self.plot().await {
            Ok(()) => ExecOutcome::Completed {
                actual_secs: started.elapsed().as_secs_f64(),
            },
            Err(ExecutionError::Cancelled) => {
                self.safety_sequence().await;
                ExecOutcome::Aborted
            }
            Err(ExecutionError::DeviceFault { detail }) => {
                self.bus.publish(
                    Event::now(EventKind::DeviceFaulted)
                        .with_job(self.job_id.clone())
                        .with_error(detail.clone()),
                );
                self.safety_sequence().await;
                ExecOutcome::Faulted { detail }
            }
        }
    }

    async fn plot(&mut self) -> Result<(), ExecutionError> {
        let token = self.abort.clone();
        let layers = std::mem::take(&mut self.layers);

        self.driver.home(&token).await?;

        let mut active_pen: Option<String> = None;
        for layer in &layers {
            if active_pen.as_deref().is_some_and(|p| p != layer.pen) {
                self.pen_swap(layer).await?;
            }
            active_pen = Some(layer.pen.clone());

            for path in &layer.paths {
                self.checkpoint().await?;
                self.driver.plot_path(path, layer.speed_mm_s, &token).await?;
            }

            self.bus.publish(
                Event::now(EventKind::LayerPlotted)
                    .with_job(self.job_id.clone())
                    .with_layer(layer.name.clone()),
            );
        }

        self.driver.pen_up(&token).await?;
        self.driver.park(&token).await?;
        Ok(())
    }

    /// Parks the device, asks the orchestrator to pause the job, and waits
    /// for the operator to swap pens and resume.
    async fn pen_swap(&mut self, layer: &PlannedLayer) -> Result<(), ExecutionError> {
        let token = self.abort.clone();
        self.driver.pen_up(&token).await?;
        self.driver.park(&token).await?;

        self.bus.publish(
            Event::now(EventKind::PenSwapRequired)
                .with_job(self.job_id.clone())
                .with_layer(layer.name.clone())
                .with_cause(layer.pen.clone()),
        );
        let _ = self.swap_tx.send(layer.pen.clone()).await;

        self.wait_for(PlotSignal::Pause).await?;
        self.wait_for(PlotSignal::Run).await
    }

    /// Between-path safe point: honors abort immediately, and on pause lifts
    /// the pen and blocks until resume.
    async fn checkpoint(&mut self) -> Result<(), ExecutionError> {
        if self.abort.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        if *self.control.borrow() == PlotSignal::Pause {
            let token = self.abort.clone();
            self.driver.pen_up(&token).await?;
            self.wait_for(PlotSignal::Run).await?;
        }
        Ok(())
    }

    /// Waits until the control signal equals `want`, or abort fires.
    async fn wait_for(&mut self, want: PlotSignal) -> Result<(), ExecutionError> {
        loop {
            if self.abort.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if *self.control.borrow() == want {
                return Ok(());
            }
            tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() {
                        // Control channel gone: the orchestrator dropped us.
                        return Err(ExecutionError::Cancelled);
                    }
                }
                _ = self.abort.cancelled() => return Err(ExecutionError::Cancelled),
            }
        }
    }

    /// Pen up, park. Runs on a fresh token: the abort token is already
    /// cancelled by the time this executes.
    async fn safety_sequence(&self) {
        let token = CancellationToken::new();
        let _ = self.driver.pen_up(&token).await;
        let _ = self.driver.park(&token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;
    use crate::geometry::Point;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Driver that logs operations and can fault on the nth plotted path.
    struct FakeDriver {
        ops: Mutex<Vec<String>>,
        fault_on_path: Option<usize>,
        paths_plotted: Mutex<usize>,
    }

    impl FakeDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
                fault_on_path: None,
                paths_plotted: Mutex::new(0),
            })
        }

        fn faulting_at(n: usize) -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
                fault_on_path: Some(n),
                paths_plotted: Mutex::new(0),
            })
        }

        fn log(&self, op: &str) {
            self.ops.lock().unwrap().push(op.to_string());
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceDriver for FakeDriver {
        async fn home(&self, _t: &CancellationToken) -> Result<(), ExecutionError> {
            self.log("home");
            Ok(())
        }
        async fn pen_up(&self, _t: &CancellationToken) -> Result<(), ExecutionError> {
            self.log("pen_up");
            Ok(())
        }
        async fn pen_down(&self, _t: &CancellationToken) -> Result<(), ExecutionError> {
            self.log("pen_down");
            Ok(())
        }
        async fn plot_path(
            &self,
            _path: &Polyline,
            _speed: f64,
            _t: &CancellationToken,
        ) -> Result<(), ExecutionError> {
            let mut n = self.paths_plotted.lock().unwrap();
            if self.fault_on_path == Some(*n) {
                return Err(ExecutionError::DeviceFault {
                    detail: "limit switch".into(),
                });
            }
            *n += 1;
            self.log("plot_path");
            Ok(())
        }
        async fn report_status(
            &self,
            _t: &CancellationToken,
        ) -> Result<DeviceStatus, ExecutionError> {
            Ok(DeviceStatus {
                idle: true,
                parked: true,
            })
        }
        async fn park(&self, _t: &CancellationToken) -> Result<(), ExecutionError> {
            self.log("park");
            Ok(())
        }
    }

    fn path() -> Polyline {
        Polyline::new(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)])
    }

    fn layer(name: &str, pen: &str, paths: usize) -> PlannedLayer {
        PlannedLayer {
            name: name.into(),
            pen: pen.into(),
            speed_mm_s: 25.0,
            paths: vec![path(); paths],
        }
    }

    fn executor(
        driver: Arc<FakeDriver>,
        layers: Vec<PlannedLayer>,
    ) -> (
        Executor,
        watch::Sender<PlotSignal>,
        CancellationToken,
        mpsc::Receiver<String>,
    ) {
        let (ctl_tx, ctl_rx) = watch::channel(PlotSignal::Run);
        let abort = CancellationToken::new();
        let (swap_tx, swap_rx) = mpsc::channel(4);
        let exec = Executor::new(
            "j-1".into(),
            driver,
            layers,
            ctl_rx,
            abort.clone(),
            swap_tx,
            Bus::new(64),
        );
        (exec, ctl_tx, abort, swap_rx)
    }

    #[tokio::test]
    async fn single_layer_completes_and_parks() {
        let driver = FakeDriver::new();
        let (exec, _ctl, _abort, _swap) = executor(driver.clone(), vec![layer("ink", "A", 2)]);
        let outcome = exec.run().await;
        assert!(matches!(outcome, ExecOutcome::Completed { .. }));
        assert_eq!(
            driver.ops(),
            vec!["home", "plot_path", "plot_path", "pen_up", "park"]
        );
    }

    #[tokio::test]
    async fn abort_runs_safety_sequence_before_reporting() {
        let driver = FakeDriver::new();
        let (exec, _ctl, abort, _swap) = executor(driver.clone(), vec![layer("ink", "A", 3)]);
        abort.cancel();
        let outcome = exec.run().await;
        assert_eq!(outcome, ExecOutcome::Aborted);
        let ops = driver.ops();
        assert_eq!(&ops[ops.len() - 2..], &["pen_up", "park"]);
    }

    #[tokio::test]
    async fn device_fault_reports_and_parks_best_effort() {
        let driver = FakeDriver::faulting_at(1);
        let (exec, _ctl, _abort, _swap) = executor(driver.clone(), vec![layer("ink", "A", 3)]);
        let outcome = exec.run().await;
        assert!(matches!(outcome, ExecOutcome::Faulted { ref detail } if detail == "limit switch"));
        let ops = driver.ops();
        assert_eq!(&ops[ops.len() - 2..], &["pen_up", "park"]);
    }

    #[tokio::test]
    async fn pause_lifts_pen_and_resume_continues() {
        let driver = FakeDriver::new();
        let (exec, ctl, _abort, _swap) = executor(driver.clone(), vec![layer("ink", "A", 2)]);

        ctl.send(PlotSignal::Pause).unwrap();
        let handle = tokio::spawn(exec.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Paused at the first checkpoint: pen lifted, nothing plotted yet.
        assert!(!driver.ops().contains(&"plot_path".to_string()));

        ctl.send(PlotSignal::Run).unwrap();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Completed { .. }));
        assert_eq!(driver.ops().iter().filter(|o| *o == "plot_path").count(), 2);
    }

    #[tokio::test]
    async fn pen_change_parks_requests_swap_and_waits_for_resume() {
        let driver = FakeDriver::new();
        let (exec, ctl, _abort, mut swap_rx) =
            executor(driver.clone(), vec![layer("base", "A", 1), layer("detail", "B", 1)]);

        let handle = tokio::spawn(exec.run());

        // The executor asks for pen B and waits paused.
        let requested = tokio::time::timeout(Duration::from_secs(2), swap_rx.recv())
            .await
            .expect("timely swap request")
            .expect("request");
        assert_eq!(requested, "B");

        ctl.send(PlotSignal::Pause).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctl.send(PlotSignal::Run).unwrap();

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Completed { .. }));
        // Parked once mid-run for the swap, once at the end.
        assert_eq!(driver.ops().iter().filter(|o| *o == "park").count(), 2);
    }

    #[tokio::test]
    async fn abort_during_pause_wins() {
        let driver = FakeDriver::new();
        let (exec, ctl, abort, _swap) = executor(driver.clone(), vec![layer("ink", "A", 2)]);

        ctl.send(PlotSignal::Pause).unwrap();
        let handle = tokio::spawn(exec.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, ExecOutcome::Aborted);
    }
}
