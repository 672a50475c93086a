//! Durable worker state: named response caches, the pending-submission
//! queue and per-version lifecycle records.
//!
//! The traits are storage-agnostic; [`SqliteStorage`] keeps everything in a
//! single SQLite database.

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{
  CacheStorage, LifecycleStore, PendingSubmission, SubmissionQueue, VersionRecord, WorkerState,
};
