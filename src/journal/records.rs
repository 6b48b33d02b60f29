//! # Durable job record store.
//!
//! The journal is the ordering authority for state; the record store keeps
//! the full job record (layers, plan, estimates, warnings) as one JSON file
//! per job so recovery does not have to re-derive them. When the two
//! disagree, the journal wins: recovery overwrites the record's state with
//! the `to` of the last journal entry.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::fsm::Job;
use crate::geometry::Drawing;

/// One-JSON-file-per-job record store.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Opens (and creates) the record directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Writes the job record, replacing any previous version.
    pub fn save(&self, job: &Job) -> Result<(), OrchestratorError> {
        let data = serde_json::to_string_pretty(job)?;
        std::fs::write(self.file_for(job.id), data)?;
        Ok(())
    }

    /// Loads one job record, if present.
    pub fn load(&self, id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        let path = self.file_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn drawing_file_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.drawing.json"))
    }

    /// Persists the optimized geometry alongside the record, so a recovered
    /// job can be re-executed without re-running the pipeline.
    pub fn save_drawing(&self, id: Uuid, drawing: &Drawing) -> Result<(), OrchestratorError> {
        let data = serde_json::to_string(drawing)?;
        std::fs::write(self.drawing_file_for(id), data)?;
        Ok(())
    }

    /// Loads persisted optimized geometry, if present.
    pub fn load_drawing(&self, id: Uuid) -> Result<Option<Drawing>, OrchestratorError> {
        let path = self.drawing_file_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Record directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let mut job = Job::new("axi-1", "/d.svg");
        job.warn("recording-degraded");
        store.save(&job).unwrap();

        let loaded = store.load(job.id).unwrap().expect("record");
        assert_eq!(loaded, job);
        assert_eq!(store.load(Uuid::new_v4()).unwrap(), None);
    }
}
