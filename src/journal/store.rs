//! # Append-only JSONL journal, one file per job.
//!
//! Each committed transition is serialized to a single JSON line, appended to
//! `<dir>/<job_id>.jsonl`, flushed, and fsynced **before** the in-memory
//! transition is applied — a transition is never acknowledged until its entry
//! is durable.
//!
//! ## Recovery rules
//! - A damaged **trailing** line (partial write) is truncated at the last
//!   well-formed entry; the job continues from that entry's state with a
//!   `journal-truncated` warning.
//! - A damaged line **before** the tail, or a sequence-number regression, is
//!   [`OrchestratorError::JournalCorruption`] — earlier history is never
//!   silently dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::entry::JournalEntry;
use crate::error::OrchestratorError;

/// Per-job append-only journal storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

/// Result of reading one job's journal during recovery.
#[derive(Debug)]
pub struct JournalReadback {
    /// Well-formed entries in sequence order.
    pub entries: Vec<JournalEntry>,
    /// True when a partial trailing record was cut off.
    pub truncated: bool,
}

impl Journal {
    /// Opens (and creates) the journal directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Journal file for a job.
    pub fn file_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.jsonl"))
    }

    /// Appends one entry durably: write line, flush, fsync.
    ///
    /// Returns only after the entry is on disk; the caller treats the return
    /// as the commit point of the transition.
    pub fn append(&self, entry: &JournalEntry) -> Result<(), OrchestratorError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(entry.job_id))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Job ids present in the journal directory.
    pub fn job_ids(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        let mut ids = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().is_none_or(|e| e != "jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = stem.parse::<Uuid>() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Reads a job's journal, repairing a partial trailing record.
    ///
    /// The file is truncated in place at the end of the last well-formed
    /// entry when trailing damage is found.
    pub fn read_job(&self, job_id: Uuid) -> Result<JournalReadback, OrchestratorError> {
        let path = self.file_for(job_id);
        if !path.exists() {
            return Ok(JournalReadback {
                entries: Vec::new(),
                truncated: false,
            });
        }

        let data = std::fs::read(&path)?;
        let mut entries: Vec<JournalEntry> = Vec::new();
        let mut good_end: u64 = 0;
        let mut truncated = false;
        let mut offset: usize = 0;

        while offset < data.len() {
            let rest = &data[offset..];
            let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
                Some(nl) => (&rest[..nl], nl + 1),
                None => (rest, rest.len()),
            };
            let at_tail = offset + consumed >= data.len();

            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(entry) => {
                    if let Some(prev) = entries.last() {
                        if entry.seq <= prev.seq {
                            return Err(OrchestratorError::JournalCorruption {
                                detail: format!(
                                    "sequence regression in {}: {} after {}",
                                    path.display(),
                                    entry.seq,
                                    prev.seq
                                ),
                            });
                        }
                    }
                    entries.push(entry);
                    good_end = (offset + consumed) as u64;
                }
                Err(_) if at_tail => {
                    // Partial trailing record: cut it off, keep the prefix.
                    truncated = true;
                    break;
                }
                Err(e) => {
                    return Err(OrchestratorError::JournalCorruption {
                        detail: format!(
                            "malformed entry mid-journal in {}: {e}",
                            path.display()
                        ),
                    });
                }
            }
            offset += consumed;
        }

        if truncated {
            let file = File::options().write(true).open(&path)?;
            file.set_len(good_end)?;
            file.sync_all()?;
        }

        Ok(JournalReadback { entries, truncated })
    }

    /// Journal directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::JobState;
    use serde_json::{Value, json};

    fn entry(seq: u64, job: Uuid, from: JobState, to: JobState) -> JournalEntry {
        JournalEntry::new(seq, job, from, to, Value::Null)
    }

    #[test]
    fn append_then_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let job = Uuid::new_v4();

        journal
            .append(&entry(0, job, JobState::New, JobState::Queued))
            .unwrap();
        journal
            .append(&entry(1, job, JobState::Queued, JobState::Analyzed))
            .unwrap();

        let readback = journal.read_job(job).unwrap();
        assert!(!readback.truncated);
        assert_eq!(readback.entries.len(), 2);
        assert_eq!(readback.entries[1].to, JobState::Analyzed);
    }

    #[test]
    fn partial_trailing_record_is_truncated_keeping_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let job = Uuid::new_v4();

        journal
            .append(&entry(0, job, JobState::New, JobState::Queued))
            .unwrap();
        let good_len = std::fs::metadata(journal.file_for(job)).unwrap().len();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new()
            .append(true)
            .open(journal.file_for(job))
            .unwrap();
        file.write_all(b"{\"seq\":1,\"job_id\":\"").unwrap();
        drop(file);

        let readback = journal.read_job(job).unwrap();
        assert!(readback.truncated);
        assert_eq!(readback.entries.len(), 1);
        assert_eq!(readback.entries[0].to, JobState::Queued);

        // The file itself was repaired; a second read is clean.
        assert_eq!(
            std::fs::metadata(journal.file_for(job)).unwrap().len(),
            good_len
        );
        let again = journal.read_job(job).unwrap();
        assert!(!again.truncated);
        assert_eq!(again.entries.len(), 1);
    }

    #[test]
    fn mid_journal_damage_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let job = Uuid::new_v4();
        let path = journal.file_for(job);

        let good = serde_json::to_string(&entry(0, job, JobState::New, JobState::Queued)).unwrap();
        std::fs::write(&path, format!("{good}\ngarbage\n{good}\n")).unwrap();

        let err = journal.read_job(job).unwrap_err();
        assert!(matches!(err, OrchestratorError::JournalCorruption { .. }));
    }

    #[test]
    fn sequence_regression_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let job = Uuid::new_v4();

        journal
            .append(&entry(2, job, JobState::New, JobState::Queued))
            .unwrap();
        journal
            .append(&entry(1, job, JobState::Queued, JobState::Analyzed))
            .unwrap();

        let err = journal.read_job(job).unwrap_err();
        assert!(matches!(err, OrchestratorError::JournalCorruption { .. }));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let readback = journal.read_job(Uuid::new_v4()).unwrap();
        assert!(readback.entries.is_empty());
        assert!(!readback.truncated);
    }

    #[test]
    fn job_ids_lists_journaled_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        journal
            .append(&entry(0, a, JobState::New, JobState::Queued))
            .unwrap();
        journal
            .append(&JournalEntry::new(
                0,
                b,
                JobState::New,
                JobState::Queued,
                json!({"cause": "submit"}),
            ))
            .unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(journal.job_ids().unwrap(), expected);
    }
}
