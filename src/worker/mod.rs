//! The offline cache worker.
//!
//! A [`Worker`] is built once per worker version from an immutable
//! [`WorkerConfig`] and receives every event from the host through
//! [`Worker::dispatch`]. Work that must outlive the handler (cache
//! write-through after a response was already handed back) is registered on
//! a [`WaitUntil`], which the host settles before it lets the worker go idle.

mod fetch;
mod lifecycle;
mod message;
mod push;
mod sync;
#[cfg(test)]
mod testing;

use async_trait::async_trait;
use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::{CacheStorage, LifecycleStore, SubmissionQueue, WorkerState};
use crate::config::WorkerConfig;
use crate::http::Request;
use crate::net::Network;

pub use fetch::FetchOutcome;
pub use message::ControlMessage;
pub use push::Notification;
pub use sync::SyncReport;

/// Everything the worker persists.
pub trait WorkerStorage: CacheStorage + SubmissionQueue + LifecycleStore + 'static {}

impl<T: CacheStorage + SubmissionQueue + LifecycleStore + 'static> WorkerStorage for T {}

/// The runtime hosting the worker.
#[async_trait]
pub trait Host: Send + Sync {
  /// Let the installed worker take over without waiting for clients to close.
  async fn skip_waiting(&self);

  /// Take control of every open page.
  async fn claim_clients(&self) -> Result<()>;

  async fn show_notification(&self, notification: Notification) -> Result<()>;

  /// Dismiss the notification that was clicked.
  async fn close_notification(&self);

  async fn open_window(&self, url: Url) -> Result<()>;
}

/// Incoming events.
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Push message with its optional text payload
  Push(Option<String>),
  NotificationClick { action: Option<String> },
  Sync { tag: String },
  Message(ControlMessage),
}

impl Event {
  fn kind(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch(_) => "fetch",
      Self::Push(_) => "push",
      Self::NotificationClick { .. } => "notificationclick",
      Self::Sync { .. } => "sync",
      Self::Message(_) => "message",
    }
  }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum EventOutcome {
  /// Lifecycle state after install, activate or skip-waiting
  Lifecycle(WorkerState),
  Fetch(FetchOutcome),
  Sync(SyncReport),
  Done,
}

/// Deferred work the host must keep the worker alive for.
#[derive(Default)]
pub struct WaitUntil {
  pending: Vec<BoxFuture<'static, ()>>,
}

impl WaitUntil {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push<F>(&mut self, work: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.pending.push(work.boxed());
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  /// Run all registered work to completion.
  pub async fn settle(self) {
    if self.is_empty() {
      return;
    }
    debug!(pending = self.len(), "Settling deferred work");
    futures::future::join_all(self.pending).await;
  }
}

pub struct Worker<S, N, H> {
  config: Arc<WorkerConfig>,
  storage: Arc<S>,
  network: Arc<N>,
  host: Arc<H>,
}

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  pub fn new(config: Arc<WorkerConfig>, storage: Arc<S>, network: Arc<N>, host: Arc<H>) -> Self {
    Self {
      config,
      storage,
      network,
      host,
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: Event, wait: &mut WaitUntil) -> Result<EventOutcome> {
    debug!(event = event.kind(), version = %self.config.version, "Dispatching event");

    match event {
      Event::Install => self.install().await.map(EventOutcome::Lifecycle),
      Event::Activate => self.activate().await.map(EventOutcome::Lifecycle),
      Event::Fetch(request) => self.fetch(request, wait).await.map(EventOutcome::Fetch),
      Event::Push(payload) => {
        self.push(payload).await?;
        Ok(EventOutcome::Done)
      }
      Event::NotificationClick { action } => {
        self.notification_click(action.as_deref()).await?;
        Ok(EventOutcome::Done)
      }
      Event::Sync { tag } => Ok(EventOutcome::Sync(self.sync(&tag).await)),
      Event::Message(message) => self.message(message).await,
    }
  }

  /// Dispatch an event and wait for all of its deferred work.
  pub async fn handle(&self, event: Event) -> Result<EventOutcome> {
    let mut wait = WaitUntil::new();
    let outcome = self.dispatch(event, &mut wait).await;
    wait.settle().await;
    outcome
  }
}

impl<S, N, H> Clone for Worker<S, N, H> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      host: Arc::clone(&self.host),
    }
  }
}
