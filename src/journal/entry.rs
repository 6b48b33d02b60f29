//! # Journal entry: one durable record per committed transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::fsm::JobState;

/// One committed state transition.
///
/// Entries are append-only: never mutated, never deleted. Sequence numbers
/// are strictly increasing per job and never reused, so any prefix of a
/// job's journal is a valid ordered history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Per-job monotonic sequence number, starting at 0.
    pub seq: u64,
    /// Job this entry belongs to.
    pub job_id: Uuid,
    /// State before the transition.
    pub from: JobState,
    /// State after the transition. The job's current state always equals the
    /// `to` of its last entry.
    pub to: JobState,
    /// Commit timestamp.
    pub at: DateTime<Utc>,
    /// Opaque transition payload: cause, estimate values, error text, job
    /// metadata on the first entry.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl JournalEntry {
    pub fn new(seq: u64, job_id: Uuid, from: JobState, to: JobState, payload: Value) -> Self {
        Self {
            seq,
            job_id,
            from,
            to,
            at: Utc::now(),
            payload,
        }
    }

    /// The `cause` field of the payload, if present.
    pub fn cause(&self) -> Option<&str> {
        self.payload.get("cause").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_roundtrips_as_single_json_line() {
        let entry = JournalEntry::new(
            3,
            Uuid::new_v4(),
            JobState::Ready,
            JobState::Armed,
            json!({"cause": "arm"}),
        );
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));
        let back: JournalEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.cause(), Some("arm"));
    }

    #[test]
    fn null_payload_is_omitted() {
        let entry = JournalEntry::new(
            0,
            Uuid::new_v4(),
            JobState::New,
            JobState::Queued,
            Value::Null,
        );
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains("payload"));
    }
}
