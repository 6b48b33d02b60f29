//! # Runtime events emitted by the orchestrator, executor, and subscribers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Transition events**: committed and rejected FSM edges
//! - **Execution events**: plot progress, pen swaps, device faults
//! - **Side-effect events**: hook and recording outcomes, journal warnings
//! - **Fan-out events**: subscriber overflow/panic reports
//!
//! The [`Event`] struct carries optional metadata (job id, states, cause,
//! error text) set per kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore exact order when events are consumed
//! from independent subscriber queues. The durable ordering authority for a
//! job's history is the journal, not the bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::fsm::JobState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Transition events ===
    /// A transition was journaled and applied.
    ///
    /// Sets: `job`, `from`, `to`, `cause` (optional).
    TransitionCommitted,

    /// A transition request was refused (illegal edge or blocking guard).
    /// Nothing was journaled; the job is unchanged.
    ///
    /// Sets: `job`, `error`.
    TransitionRejected,

    /// A soft-fail guard did not pass during an arming checklist. The
    /// transition proceeded; the failure is recorded as a job warning.
    ///
    /// Sets: `job`, `error` (guard name + detail).
    GuardSoftFailed,

    // === Execution events ===
    /// A planned layer finished plotting.
    ///
    /// Sets: `job`, `layer`.
    LayerPlotted,

    /// The executor parked the device for a manual pen change and paused
    /// the job. Resume after swapping pens.
    ///
    /// Sets: `job`, `layer`, `cause` (pen id).
    PenSwapRequired,

    /// The driver reported a hardware fault; the job is being failed.
    ///
    /// Sets: `job`, `error`.
    DeviceFaulted,

    // === Side-effect events ===
    /// A configured hook action failed. Never retried, never affects the FSM.
    ///
    /// Sets: `job`, `hook`, `error`.
    HookFailed,

    /// Video recording could not start or stop. Soft failure: the job
    /// continues with a degradation warning.
    ///
    /// Sets: `job`, `error`.
    RecordingFailed,

    /// A partial trailing journal record was truncated during recovery.
    ///
    /// Sets: `job`.
    JournalTruncated,

    // === Runtime events ===
    /// Shutdown requested (OS signal observed); active jobs are being
    /// safety-aborted.
    ShutdownRequested,

    // === Fan-out events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `hook` (subscriber name), `error` (reason).
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `hook` (subscriber name), `error` (panic info).
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Job id, if applicable.
    pub job: Option<Arc<str>>,
    /// Prior state for transition events.
    pub from: Option<JobState>,
    /// New state for transition events.
    pub to: Option<JobState>,
    /// Why the transition or action happened (command, recovery, pen id).
    pub cause: Option<Arc<str>>,
    /// Error or rejection detail.
    pub error: Option<Arc<str>>,
    /// Hook or subscriber name.
    pub hook: Option<Arc<str>>,
    /// Layer name for execution events.
    pub layer: Option<Arc<str>>,
    /// Source drawing path, set on transition events for hook substitution.
    pub path: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next
    /// sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            from: None,
            to: None,
            cause: None,
            error: None,
            hook: None,
            layer: None,
            path: None,
        }
    }

    /// Attaches a job id.
    #[inline]
    pub fn with_job(mut self, job: impl Into<Arc<str>>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Attaches the prior and new state of a transition.
    #[inline]
    pub fn with_states(mut self, from: JobState, to: JobState) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Attaches a cause string.
    #[inline]
    pub fn with_cause(mut self, cause: impl Into<Arc<str>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attaches an error or rejection detail.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a hook or subscriber name.
    #[inline]
    pub fn with_hook(mut self, hook: impl Into<Arc<str>>) -> Self {
        self.hook = Some(hook.into());
        self
    }

    /// Attaches a layer name.
    #[inline]
    pub fn with_layer(mut self, layer: impl Into<Arc<str>>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    /// Attaches the source drawing path.
    #[inline]
    pub fn with_path(mut self, path: impl Into<Arc<str>>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_hook(subscriber)
            .with_error(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_hook(subscriber)
            .with_error(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::TransitionCommitted);
        let b = Event::now(EventKind::TransitionCommitted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builder_sets_metadata() {
        let ev = Event::now(EventKind::TransitionCommitted)
            .with_job("job-1")
            .with_states(JobState::New, JobState::Queued)
            .with_cause("submit");
        assert_eq!(ev.job.as_deref(), Some("job-1"));
        assert_eq!(ev.from, Some(JobState::New));
        assert_eq!(ev.to, Some(JobState::Queued));
        assert_eq!(ev.cause.as_deref(), Some("submit"));
    }
}
