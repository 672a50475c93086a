//! Host runtime used by the command line: prints what a browser would show.

use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;
use url::Url;

use crate::worker::{Host, Notification};

pub struct ConsoleHost;

#[async_trait]
impl Host for ConsoleHost {
  async fn skip_waiting(&self) {
    info!("Host: skip waiting");
  }

  async fn claim_clients(&self) -> Result<()> {
    info!("Host: claimed clients");
    Ok(())
  }

  async fn show_notification(&self, notification: Notification) -> Result<()> {
    println!("[notification] {}: {}", notification.title, notification.body);
    let actions: Vec<_> = notification
      .actions
      .iter()
      .map(|a| a.action.as_str())
      .collect();
    println!("  actions: {}", actions.join(", "));
    Ok(())
  }

  async fn close_notification(&self) {
    info!("Host: notification closed");
  }

  async fn open_window(&self, url: Url) -> Result<()> {
    println!("[open window] {}", url);
    Ok(())
  }
}
