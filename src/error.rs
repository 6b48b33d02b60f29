//! Error types used by the orchestrator and its collaborators.
//!
//! This module defines two main error enums:
//!
//! - [`OrchestratorError`] — failures of command/query operations against the
//!   job lifecycle (illegal edges, failed guards, unknown jobs, storage).
//! - [`ExecutionError`] — failures raised while driving the physical device
//!   or the external optimization pipeline.
//!
//! Both types provide `as_label` helpers for logs/metrics, and
//! [`OrchestratorError::is_retryable`] distinguishes failures that leave the
//! job resumable from the same state.

use thiserror::Error;

use crate::fsm::JobState;
use crate::guards::GuardResult;

/// Errors produced by command/query operations on the job lifecycle.
///
/// Guard and assignment failures leave the job untouched and resumable from
/// its current state; journal corruption and device faults are terminal for
/// the affected job.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Requested edge is not in the transition table. The job is unaffected.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the job is currently in.
        from: JobState,
        /// State that was requested.
        to: JobState,
    },

    /// One or more blocking checklist items failed. Carries the full failing
    /// set so the caller can present every outstanding issue at once.
    #[error("guard checklist failed: {}", format_guard_failures(failures))]
    GuardFailed {
        /// Every failed guard, blocking and soft, from the evaluated checklist.
        failures: Vec<GuardResult>,
    },

    /// No pen in the pool satisfies the layer's compatibility threshold.
    /// The job cannot progress past analysis until the pool changes and the
    /// plan is re-triggered.
    #[error("no compatible pen for layer '{layer}'")]
    NoCompatiblePen {
        /// Name of the layer that could not be assigned.
        layer: String,
    },

    /// The external optimization pipeline errored. Retryable: the job stays
    /// where it was and the operation may be re-issued.
    #[error("optimization pipeline failed: {detail}")]
    PipelineFailure {
        /// Pipeline stderr tail or exit description.
        detail: String,
    },

    /// Journal data is damaged beyond the tail-truncation rule.
    #[error("journal corruption: {detail}")]
    JournalCorruption {
        /// What was found and where.
        detail: String,
    },

    /// No job with this identity is known to the orchestrator.
    #[error("unknown job: {id}")]
    UnknownJob {
        /// The requested job id.
        id: String,
    },

    /// No device with this identity is registered in the configuration.
    #[error("unknown device: {id}")]
    UnknownDevice {
        /// The requested device id.
        id: String,
    },

    /// The operation is not meaningful in the job's current state
    /// (e.g. `plan` before analysis has produced layers).
    #[error("cannot {op} in state {actual}")]
    WrongState {
        /// What was attempted.
        op: String,
        /// State the job is in.
        actual: JobState,
    },

    /// A recovered job cannot be resumed (plan or geometry missing); only
    /// `abort` remains available.
    #[error("job not resumable: {detail}")]
    NotResumable {
        /// Why resumption is impossible.
        detail: String,
    },

    /// Underlying storage error (journal or record store).
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error.
    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn format_guard_failures(failures: &[GuardResult]) -> String {
    let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
    names.join(", ")
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::GuardFailed { .. } => "guard_failed",
            OrchestratorError::NoCompatiblePen { .. } => "no_compatible_pen",
            OrchestratorError::PipelineFailure { .. } => "pipeline_failure",
            OrchestratorError::JournalCorruption { .. } => "journal_corruption",
            OrchestratorError::UnknownJob { .. } => "unknown_job",
            OrchestratorError::UnknownDevice { .. } => "unknown_device",
            OrchestratorError::WrongState { .. } => "wrong_state",
            OrchestratorError::NotResumable { .. } => "not_resumable",
            OrchestratorError::Io(_) => "storage_io",
            OrchestratorError::Serde(_) => "record_encoding",
        }
    }

    /// True when the failure leaves the job resumable from the same state.
    ///
    /// Guard, assignment, and pipeline failures are reported and may be
    /// re-issued after the operator resolves them; storage and corruption
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::GuardFailed { .. }
                | OrchestratorError::NoCompatiblePen { .. }
                | OrchestratorError::PipelineFailure { .. }
        )
    }
}

/// Errors raised while driving the device or the optimization pipeline.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The driver reported a hardware error mid-execution. The job
    /// transitions to `FAILED`; a safety park is attempted best-effort.
    #[error("device fault: {detail}")]
    DeviceFault {
        /// Driver-reported fault description.
        detail: String,
    },

    /// Execution was cancelled by an abort signal or runtime shutdown.
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutionError::DeviceFault { .. } => "device_fault",
            ExecutionError::Cancelled => "execution_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::Severity;

    #[test]
    fn invalid_transition_names_both_states() {
        let err = OrchestratorError::InvalidTransition {
            from: JobState::Completed,
            to: JobState::Plotting,
        };
        assert_eq!(err.to_string(), "invalid transition: COMPLETED -> PLOTTING");
        assert_eq!(err.as_label(), "invalid_transition");
        assert!(!err.is_retryable());
    }

    #[test]
    fn guard_failed_lists_all_names() {
        let err = OrchestratorError::GuardFailed {
            failures: vec![
                GuardResult::fail("device-idle", Severity::Blocking, "device busy"),
                GuardResult::fail("plan-present", Severity::Blocking, "no plan"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("device-idle"));
        assert!(msg.contains("plan-present"));
        assert!(err.is_retryable());
    }

    #[test]
    fn pipeline_failure_is_retryable() {
        let err = OrchestratorError::PipelineFailure {
            detail: "exit status 2".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.as_label(), "pipeline_failure");
    }
}
