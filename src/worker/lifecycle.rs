//! Install / activate lifecycle and cache versioning.
//!
//! `installing → installed (waiting) → activating → activated`. A failed
//! install ends in `redundant` and never activates, as does a waiting
//! version once a newer one finishes installing.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::{Host, Worker, WorkerStorage};
use crate::cache::{VersionRecord, WorkerState};
use crate::http::Request;
use crate::net::Network;

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  /// Populate the current cache with the precache set.
  ///
  /// All-or-nothing: if any resource cannot be fetched the install fails and
  /// nothing is written.
  pub async fn install(&self) -> Result<WorkerState> {
    let version = &self.config.version;
    let previous = self.storage.load_version(version)?;

    if let Some(record) = previous {
      if matches!(record.state, WorkerState::Activating | WorkerState::Activated) {
        return Err(eyre!(
          "Worker version {} is already {}; bump the cache version to install an update",
          version,
          record.state
        ));
      }
    }

    let mut skip_waiting = previous.map(|r| r.skip_waiting).unwrap_or(false);
    self.save_state(WorkerState::Installing, skip_waiting)?;
    info!(version = %version, cache = %self.config.cache_name, "Installing worker");
    self.storage.open_cache(&self.config.cache_name)?;

    match self.precache(&self.config.precache).await {
      Ok(count) => {
        info!(version = %version, resources = count, "Precache complete");
        if self.config.skip_waiting_on_install {
          self.host.skip_waiting().await;
          skip_waiting = true;
        }
        self.save_state(WorkerState::Installed, skip_waiting)?;
        self.retire_waiting_versions()?;
        Ok(WorkerState::Installed)
      }
      Err(e) => {
        self.save_state(WorkerState::Redundant, skip_waiting)?;
        Err(eyre!("Failed to install worker {}: {}", version, e))
      }
    }
  }

  /// Promote the installed version: purge every other cache and claim clients.
  ///
  /// Stays `installed` while another version is active, unless skip-waiting
  /// was requested.
  pub async fn activate(&self) -> Result<WorkerState> {
    let version = &self.config.version;
    let record = self
      .storage
      .load_version(version)?
      .ok_or_else(|| eyre!("Worker version {} has not been installed", version))?;

    match record.state {
      WorkerState::Activated => return Ok(WorkerState::Activated),
      WorkerState::Installed => {}
      other => {
        return Err(eyre!(
          "Cannot activate worker version {} while {}",
          version,
          other
        ))
      }
    }

    if let Some(active) = self.storage.active_version()?.filter(|v| v != version) {
      if !record.skip_waiting {
        info!(version = %version, active = %active, "Waiting for the active worker to release its clients");
        return Ok(WorkerState::Installed);
      }
    }

    self.save_state(WorkerState::Activating, record.skip_waiting)?;
    if let Err(e) = self.purge_old_versions() {
      self.save_state(WorkerState::Installed, record.skip_waiting)?;
      return Err(eyre!("Failed to activate worker {}: {}", version, e));
    }
    self.save_state(WorkerState::Activated, record.skip_waiting)?;
    info!(version = %version, "Worker activated");

    self.host.claim_clients().await?;
    Ok(WorkerState::Activated)
  }

  /// Skip the waiting phase on demand, activating right away when installed.
  pub async fn skip_waiting(&self) -> Result<Option<WorkerState>> {
    self.host.skip_waiting().await;

    let Some(record) = self.storage.load_version(&self.config.version)? else {
      warn!(version = %self.config.version, "Skip waiting requested before install");
      return Ok(None);
    };

    if record.state == WorkerState::Redundant {
      return Err(eyre!(
        "Worker version {} is redundant and can no longer activate",
        self.config.version
      ));
    }

    self.save_state(record.state, true)?;
    if record.state == WorkerState::Installed {
      return self.activate().await.map(Some);
    }
    Ok(Some(record.state))
  }

  /// Current lifecycle state of this version.
  pub fn state(&self) -> Result<Option<WorkerState>> {
    Ok(
      self
        .storage
        .load_version(&self.config.version)?
        .map(|r| r.state),
    )
  }

  /// Fetch every URL and store the responses in one transaction.
  pub(crate) async fn precache(&self, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| {
      let network = Arc::clone(&self.network);
      let request = Request::get(url.clone());
      async move {
        let response = network.fetch(request.clone()).await?;
        if !response.ok() {
          return Err(eyre!(
            "Failed to precache {}: status {}",
            request.url,
            response.status
          ));
        }
        let cached = response.into_cached(&request.url)?;
        Ok::<_, color_eyre::Report>((request, cached))
      }
    });

    let entries = futures::future::try_join_all(fetches).await?;
    self.storage.put_all(&self.config.cache_name, &entries)?;
    Ok(entries.len())
  }

  /// Only the newest install may wait; older waiting versions and their
  /// caches are dropped.
  fn retire_waiting_versions(&self) -> Result<()> {
    for (version, record) in self.storage.versions()? {
      if version == self.config.version
        || !matches!(record.state, WorkerState::Installing | WorkerState::Installed)
      {
        continue;
      }

      self.storage.save_version(
        &version,
        VersionRecord {
          state: WorkerState::Redundant,
          ..record
        },
      )?;
      let cache_name = self.config.cache_name_for(&version);
      self.storage.delete_cache(&cache_name)?;
      info!(version = %version, cache = %cache_name, "Superseded waiting worker");
    }
    Ok(())
  }

  fn purge_old_versions(&self) -> Result<()> {
    for name in self.storage.names()? {
      if name != self.config.cache_name {
        self.storage.delete_cache(&name)?;
        info!(cache = %name, "Deleted old cache");
      }
    }
    self.storage.forget_other_versions(&self.config.version)
  }

  fn save_state(&self, state: WorkerState, skip_waiting: bool) -> Result<()> {
    self.storage.save_version(
      &self.config.version,
      VersionRecord {
        state,
        skip_waiting,
      },
    )
  }
}
