//! # Durable history: journal, record store, and crash recovery.
//!
//! The journal is the sole source of truth for job state. Every committed
//! transition is one [`JournalEntry`] appended and fsynced before the
//! in-memory mutation happens; recovery replays the per-job files to
//! reconstruct state after a crash.
//!
//! ## Contents
//! - [`JournalEntry`] the logical record `{seq, job, from, to, at, payload}`
//! - [`Journal`] append-only JSONL storage with tail-repairing readback
//! - [`RecordStore`] full job records (layers, plan, estimates) as JSON files
//! - [`recover_all`] startup replay producing [`RecoveredJob`]s

mod entry;
mod records;
mod recovery;
mod store;

pub use entry::JournalEntry;
pub use records::RecordStore;
pub use recovery::{RecoveredJob, recover_all, replay_state};
pub use store::{Journal, JournalReadback};
