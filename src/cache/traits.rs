//! Storage traits backing the worker.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::fmt;
use std::str::FromStr;

use crate::http::{CachedResponse, Request};

/// Versioned named caches of request → response snapshots.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open_cache(&self, cache_name: &str) -> Result<()>;

  /// Names of every existing cache.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a cache and all its entries. Returns false if it did not exist.
  fn delete_cache(&self, cache_name: &str) -> Result<bool>;

  /// Store a response, replacing any previous entry for the same request.
  fn put(&self, cache_name: &str, request: &Request, response: &CachedResponse) -> Result<()>;

  /// Store several responses atomically.
  fn put_all(&self, cache_name: &str, entries: &[(Request, CachedResponse)]) -> Result<()>;

  /// Look up the stored response for a request.
  fn lookup(&self, cache_name: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// URLs of the requests stored in a cache, sorted.
  fn keys(&self, cache_name: &str) -> Result<Vec<String>>;
}

/// A deferred form submission waiting for connectivity.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
  pub id: i64,
  pub request: Request,
  pub queued_at: DateTime<Utc>,
}

/// Durable queue of outbound requests to replay once back online.
pub trait SubmissionQueue: Send + Sync {
  /// Queue a request. Re-queueing an identical request is a no-op.
  fn enqueue(&self, queue: &str, request: &Request) -> Result<()>;

  /// All queued submissions, oldest first.
  fn pending(&self, queue: &str) -> Result<Vec<PendingSubmission>>;

  /// Remove a submission after a successful replay.
  fn remove(&self, queue: &str, id: i64) -> Result<()>;
}

/// Lifecycle phase of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Activated,
  /// Install failed or a newer version took over
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WorkerState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "activating" => Ok(Self::Activating),
      "activated" => Ok(Self::Activated),
      "redundant" => Ok(Self::Redundant),
      other => Err(format!("unknown worker state '{}'", other)),
    }
  }
}

/// Persisted lifecycle record of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
  pub state: WorkerState,
  /// Skip the waiting phase once installed
  pub skip_waiting: bool,
}

/// Persistence of worker lifecycle records across host restarts.
pub trait LifecycleStore: Send + Sync {
  fn load_version(&self, version: &str) -> Result<Option<VersionRecord>>;

  fn save_version(&self, version: &str, record: VersionRecord) -> Result<()>;

  /// Drop the record of every version except `keep`.
  fn forget_other_versions(&self, keep: &str) -> Result<()>;

  /// The version currently in the activated state, if any.
  fn active_version(&self) -> Result<Option<String>>;

  /// Every recorded version, sorted by name.
  fn versions(&self) -> Result<Vec<(String, VersionRecord)>>;
}
