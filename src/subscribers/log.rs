//! # Structured-logging subscriber.
//!
//! [`LogWriter`] forwards runtime events to `tracing`: transitions at info,
//! degradations at warn, faults at error. Install a `tracing` subscriber in
//! the host application to choose format and destination.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event-to-`tracing` bridge.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let job = e.job.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TransitionCommitted => {
                info!(
                    job,
                    from = e.from.map(|s| s.to_string()),
                    to = e.to.map(|s| s.to_string()),
                    cause = e.cause.as_deref(),
                    "transition committed"
                );
            }
            EventKind::TransitionRejected => {
                warn!(job, error = e.error.as_deref(), "transition rejected");
            }
            EventKind::GuardSoftFailed => {
                warn!(job, detail = e.error.as_deref(), "soft guard failed");
            }
            EventKind::LayerPlotted => {
                info!(job, layer = e.layer.as_deref(), "layer plotted");
            }
            EventKind::PenSwapRequired => {
                info!(
                    job,
                    layer = e.layer.as_deref(),
                    pen = e.cause.as_deref(),
                    "pen swap required; job paused"
                );
            }
            EventKind::DeviceFaulted => {
                error!(job, error = e.error.as_deref(), "device fault");
            }
            EventKind::HookFailed => {
                warn!(
                    job,
                    hook = e.hook.as_deref(),
                    error = e.error.as_deref(),
                    "hook failed"
                );
            }
            EventKind::RecordingFailed => {
                warn!(job, error = e.error.as_deref(), "recording degraded");
            }
            EventKind::JournalTruncated => {
                warn!(job, "partial journal record truncated");
            }
            EventKind::ShutdownRequested => {
                warn!("shutdown requested; aborting active jobs");
            }
            EventKind::SubscriberOverflow => {
                warn!(
                    subscriber = e.hook.as_deref(),
                    reason = e.error.as_deref(),
                    "subscriber queue overflow"
                );
            }
            EventKind::SubscriberPanicked => {
                error!(
                    subscriber = e.hook.as_deref(),
                    info = e.error.as_deref(),
                    "subscriber panicked"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
