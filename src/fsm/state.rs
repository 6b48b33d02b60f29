//! # Job lifecycle states and the fixed transition table.
//!
//! A job flows through:
//!
//! ```text
//! NEW → QUEUED → ANALYZED → OPTIMIZED → READY → ARMED → PLOTTING → COMPLETED
//!                                                 │         │  ▲
//!                                                 │         ▼  │
//!                                                 └──────► PAUSED ──► ABORTED
//! ```
//!
//! `COMPLETED`, `ABORTED`, `FAILED` are terminal. `PLOTTING ⇄ PAUSED` is the
//! only bidirectional pair; `PAUSED → ABORTED` is always legal. The edge into
//! `ARMED` is the only guard-gated edge (arming checklist + device lock).
//!
//! ## Rules
//! - Legality is decided by [`JobState::can_transition_to`] alone; callers
//!   never encode edges themselves.
//! - A request targeting the current state is treated by the orchestrator as
//!   an idempotent no-op, not an edge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The eleven states of the plot-job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, not yet submitted.
    New,
    /// Submitted and waiting for analysis.
    Queued,
    /// Layers detected, pre-optimization estimate available.
    Analyzed,
    /// External path optimization done, post-optimization estimate available.
    Optimized,
    /// Plan complete; waiting for the operator to arm.
    Ready,
    /// Checklist passed, device lock held, recording starting.
    Armed,
    /// The device is executing the plan.
    Plotting,
    /// Execution suspended (operator pause or pen swap).
    Paused,
    /// Terminal: the plan finished on the device.
    Completed,
    /// Terminal: execution was cancelled; the device was parked.
    Aborted,
    /// Terminal: an unrecoverable error stopped the job.
    Failed,
}

impl JobState {
    /// All states, in lifecycle order. Useful for table-driven tests.
    pub const ALL: [JobState; 11] = [
        JobState::New,
        JobState::Queued,
        JobState::Analyzed,
        JobState::Optimized,
        JobState::Ready,
        JobState::Armed,
        JobState::Plotting,
        JobState::Paused,
        JobState::Completed,
        JobState::Aborted,
        JobState::Failed,
    ];

    /// True for `COMPLETED`, `ABORTED`, `FAILED`. Terminal states have no
    /// outgoing edges.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Aborted | JobState::Failed
        )
    }

    /// Whether `(self, target)` is a legal edge in the transition table.
    pub const fn can_transition_to(self, target: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, target),
            (New, Queued)
                | (Queued, Analyzed)
                | (Queued, Aborted)
                | (Analyzed, Optimized)
                | (Analyzed, Aborted)
                | (Optimized, Ready)
                | (Optimized, Aborted)
                | (Ready, Armed)
                | (Ready, Aborted)
                | (Armed, Plotting)
                | (Armed, Ready)
                | (Armed, Failed)
                | (Armed, Aborted)
                | (Plotting, Paused)
                | (Plotting, Completed)
                | (Plotting, Aborted)
                | (Plotting, Failed)
                | (Paused, Plotting)
                | (Paused, Aborted)
        )
    }

    /// Whether the edge `(self, target)` is gated by the arming checklist.
    pub const fn requires_guards(self, target: JobState) -> bool {
        matches!((self, target), (JobState::Ready, JobState::Armed))
    }

    /// States from which `abort` is accepted.
    pub const fn can_abort(self) -> bool {
        self.can_transition_to(JobState::Aborted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::New => "NEW",
            JobState::Queued => "QUEUED",
            JobState::Analyzed => "ANALYZED",
            JobState::Optimized => "OPTIMIZED",
            JobState::Ready => "READY",
            JobState::Armed => "ARMED",
            JobState::Plotting => "PLOTTING",
            JobState::Paused => "PAUSED",
            JobState::Completed => "COMPLETED",
            JobState::Aborted => "ABORTED",
            JobState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges_are_legal() {
        let path = [
            JobState::New,
            JobState::Queued,
            JobState::Analyzed,
            JobState::Optimized,
            JobState::Ready,
            JobState::Armed,
            JobState::Plotting,
            JobState::Completed,
        ];
        for w in path.windows(2) {
            assert!(
                w[0].can_transition_to(w[1]),
                "{} -> {} should be legal",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in [JobState::Completed, JobState::Aborted, JobState::Failed] {
            for to in JobState::ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from} -> {to} must be illegal"
                );
            }
        }
    }

    #[test]
    fn plotting_paused_is_the_only_bidirectional_pair() {
        let mut bidirectional = Vec::new();
        for a in JobState::ALL {
            for b in JobState::ALL {
                if a != b && a.can_transition_to(b) && b.can_transition_to(a) {
                    bidirectional.push((a, b));
                }
            }
        }
        assert_eq!(
            bidirectional,
            vec![
                (JobState::Plotting, JobState::Paused),
                (JobState::Paused, JobState::Plotting),
            ]
        );
    }

    #[test]
    fn paused_abort_always_legal() {
        assert!(JobState::Paused.can_transition_to(JobState::Aborted));
    }

    #[test]
    fn completed_to_plotting_is_illegal() {
        assert!(!JobState::Completed.can_transition_to(JobState::Plotting));
    }

    #[test]
    fn only_arming_is_guarded() {
        for a in JobState::ALL {
            for b in JobState::ALL {
                let guarded = a.requires_guards(b);
                assert_eq!(
                    guarded,
                    a == JobState::Ready && b == JobState::Armed,
                    "{a} -> {b}"
                );
            }
        }
    }

    #[test]
    fn display_is_uppercase() {
        assert_eq!(JobState::Analyzed.to_string(), "ANALYZED");
        assert_eq!(JobState::Plotting.to_string(), "PLOTTING");
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&JobState::Optimized).unwrap();
        assert_eq!(json, "\"OPTIMIZED\"");
        let back: JobState = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(back, JobState::Paused);
    }
}
