//! # Crash recovery: rebuild job state from the journal.
//!
//! On startup the journal directory is scanned and every job's entries are
//! replayed **before any new command is accepted**. Replay is pure: the same
//! journal always reconstructs the same state, so replaying twice is
//! idempotent.
//!
//! ```text
//! for each <job_id>.jsonl:
//!   read entries (repairing a partial tail)
//!   validate the chain: entry.from == previous.to
//!   state = last entry's `to`
//!   record store has the job? adopt record, overwrite state
//!                       else: rebuild a skeleton from the first entry's payload
//! ```
//!
//! What recovery does **not** do: decide what happens to a job found in
//! `PLOTTING`. That is a policy decision involving the device driver, applied
//! by the orchestrator through ordinary journaled transitions.

use chrono::{DateTime, Utc};

use super::entry::JournalEntry;
use super::records::RecordStore;
use super::store::Journal;
use crate::error::OrchestratorError;
use crate::fsm::{Job, JobState};

/// One job rebuilt from its journal.
#[derive(Debug)]
pub struct RecoveredJob {
    /// The job with its reconstructed state and (if truncation happened) a
    /// `journal-truncated` warning.
    pub job: Job,
    /// True when a partial trailing record was cut off during readback.
    pub truncated: bool,
    /// Sequence number of the last entry; the next append continues after it.
    pub last_seq: u64,
}

/// Reconstructed final state of an entry chain: the `to` of the last entry.
pub fn replay_state(entries: &[JournalEntry]) -> Option<JobState> {
    entries.last().map(|e| e.to)
}

/// Validates chain continuity: every entry starts where the previous ended.
fn validate_chain(entries: &[JournalEntry]) -> Result<(), OrchestratorError> {
    for w in entries.windows(2) {
        if w[1].from != w[0].to {
            return Err(OrchestratorError::JournalCorruption {
                detail: format!(
                    "broken chain for job {}: entry {} starts at {} but previous ended at {}",
                    w[1].job_id, w[1].seq, w[1].from, w[0].to
                ),
            });
        }
    }
    Ok(())
}

/// Rebuilds every journaled job.
///
/// Jobs with an empty journal (file present but no entries) are skipped;
/// they never had a committed transition.
pub fn recover_all(
    journal: &Journal,
    records: &RecordStore,
) -> Result<Vec<RecoveredJob>, OrchestratorError> {
    let mut recovered = Vec::new();

    for job_id in journal.job_ids()? {
        let readback = journal.read_job(job_id)?;
        if readback.entries.is_empty() {
            continue;
        }
        validate_chain(&readback.entries)?;

        let state = replay_state(&readback.entries).expect("non-empty entries");
        let last_seq = readback.entries.last().expect("non-empty entries").seq;

        let mut job = match records.load(job_id)? {
            Some(record) => record,
            None => skeleton_from_entries(&readback.entries),
        };
        job.state = state;
        if readback.truncated {
            job.warn("journal-truncated");
        }

        recovered.push(RecoveredJob {
            job,
            truncated: readback.truncated,
            last_seq,
        });
    }

    Ok(recovered)
}

/// Rebuilds a job skeleton from the metadata the first entry carries.
fn skeleton_from_entries(entries: &[JournalEntry]) -> Job {
    let first = &entries[0];
    let device_id = first
        .payload
        .get("device_id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let source = first
        .payload
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let created_at = first
        .payload
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or(first.at);
    Job::from_recovery(first.job_id, device_id, source, created_at)
}
