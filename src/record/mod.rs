//! # Video-recording collaborator.
//!
//! Recording brackets execution: capture starts when a job enters `ARMED`
//! and stops when it reaches a terminal state. The camera is auxiliary —
//! every failure here is soft. A `RecordingFailed` event is published, the
//! orchestrator flags the job, and execution continues.
//!
//! The supervisor is a bus subscriber, so start/stop run as background tasks
//! signaled by the transition-event channel; the orchestrator never awaits
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::events::{Bus, Event, EventKind};
use crate::fsm::JobState;
use crate::subscribers::Subscribe;

/// Capture device contract.
#[async_trait]
pub trait Recorder: Send + Sync + 'static {
    /// Begins capture for a job. `Err` carries a human-readable reason.
    async fn start(&self, job_id: &str) -> Result<(), String>;

    /// Ends capture for a job.
    async fn stop(&self, job_id: &str) -> Result<(), String>;
}

/// Recorder used when no camera is configured: every call succeeds.
pub struct NoopRecorder;

#[async_trait]
impl Recorder for NoopRecorder {
    async fn start(&self, _job_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn stop(&self, _job_id: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Bus subscriber driving the recorder from transition events.
pub struct RecordingSupervisor {
    recorder: Arc<dyn Recorder>,
    bus: Bus,
}

impl RecordingSupervisor {
    pub fn new(recorder: Arc<dyn Recorder>, bus: Bus) -> Self {
        Self { recorder, bus }
    }

    fn spawn_op(&self, job_id: String, starting: bool) {
        let recorder = Arc::clone(&self.recorder);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = if starting {
                recorder.start(&job_id).await
            } else {
                recorder.stop(&job_id).await
            };
            if let Err(reason) = result {
                let op = if starting { "start" } else { "stop" };
                warn!(job = job_id, op, reason, "recording degraded");
                bus.publish(
                    Event::now(EventKind::RecordingFailed)
                        .with_job(job_id)
                        .with_error(format!("{op}: {reason}")),
                );
            }
        });
    }
}

#[async_trait]
impl Subscribe for RecordingSupervisor {
    async fn on_event(&self, event: &Event) {
        if event.kind != EventKind::TransitionCommitted {
            return;
        }
        let (Some(job), Some(to)) = (&event.job, event.to) else {
            return;
        };
        match to {
            JobState::Armed => self.spawn_op(job.to_string(), true),
            s if s.is_terminal() => self.spawn_op(job.to_string(), false),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyCamera {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Recorder for FlakyCamera {
        async fn start(&self, _job_id: &str) -> Result<(), String> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Err("camera not found".into())
        }
        async fn stop(&self, _job_id: &str) -> Result<(), String> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn armed_starts_and_failure_is_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let camera = Arc::new(FlakyCamera {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let sup = RecordingSupervisor::new(camera.clone(), bus.clone());

        sup.on_event(
            &Event::now(EventKind::TransitionCommitted)
                .with_job("j-1")
                .with_states(JobState::Ready, JobState::Armed),
        )
        .await;

        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(ev.kind, EventKind::RecordingFailed);
        assert_eq!(camera.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_state_stops_capture() {
        let bus = Bus::new(16);
        let camera = Arc::new(FlakyCamera {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let sup = RecordingSupervisor::new(camera.clone(), bus.clone());

        sup.on_event(
            &Event::now(EventKind::TransitionCommitted)
                .with_job("j-1")
                .with_states(JobState::Plotting, JobState::Completed),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
        assert_eq!(camera.starts.load(Ordering::SeqCst), 0);
    }
}
