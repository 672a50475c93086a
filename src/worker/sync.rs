//! Background sync: replay deferred form submissions.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

use super::{Host, Worker, WorkerStorage};
use crate::cache::PendingSubmission;
use crate::http::Request;
use crate::net::Network;

/// What a sync event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReport {
  /// Tag is not ours
  Ignored,
  /// The queue could not be read; nothing was replayed
  QueueUnavailable,
  Drained { replayed: usize, retained: usize },
}

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  /// Defer a submission until the next sync.
  pub fn defer_submission(&self, request: &Request) -> Result<()> {
    self.storage.enqueue(&self.config.queue_name, request)?;
    info!(url = %request.url, queue = %self.config.queue_name, "Queued submission for background sync");
    Ok(())
  }

  /// Replay every queued submission concurrently.
  ///
  /// Successful replays leave the queue; failures stay for the next sync and
  /// never affect their siblings.
  pub async fn sync(&self, tag: &str) -> SyncReport {
    if tag != self.config.sync_tag {
      debug!(tag, "Ignoring sync tag");
      return SyncReport::Ignored;
    }

    let pending = match self.storage.pending(&self.config.queue_name) {
      Ok(pending) => pending,
      Err(e) => {
        error!(queue = %self.config.queue_name, "Background sync failed: {}", e);
        return SyncReport::QueueUnavailable;
      }
    };

    let replays = pending.into_iter().map(|submission| self.replay(submission));
    let results = futures::future::join_all(replays).await;

    let replayed = results.iter().filter(|ok| **ok).count();
    let retained = results.len() - replayed;
    info!(replayed, retained, "Background sync complete");

    SyncReport::Drained { replayed, retained }
  }

  async fn replay(&self, submission: PendingSubmission) -> bool {
    let PendingSubmission {
      id,
      request,
      queued_at,
    } = submission;
    let url = request.url.clone();

    let result = match self.network.fetch(request).await {
      Ok(response) if response.ok() => self.storage.remove(&self.config.queue_name, id),
      Ok(response) => Err(eyre!("server answered {}", response.status)),
      Err(e) => Err(e),
    };

    match result {
      Ok(()) => {
        debug!(url = %url, id, "Replayed queued submission");
        true
      }
      Err(e) => {
        warn!(url = %url, id, queued_at = %queued_at, "Failed to replay submission: {}", e);
        false
      }
    }
  }
}
