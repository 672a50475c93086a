//! Push messages surfaced as notifications.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info};

use super::{Host, Worker, WorkerStorage};
use crate::net::Network;

pub const ACTION_VIEW: &str = "view";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
  pub arrived_at: DateTime<Utc>,
  pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  /// Show a notification for a push message. The payload, if any, is the body.
  pub async fn push(&self, payload: Option<String>) -> Result<()> {
    let settings = &self.config.notification;
    let body = payload.unwrap_or_else(|| settings.default_body.clone());

    let notification = Notification {
      title: settings.title.clone(),
      body,
      icon: settings.icon.clone(),
      badge: settings.badge.clone(),
      vibrate: settings.vibrate.clone(),
      data: NotificationData {
        arrived_at: Utc::now(),
        primary_key: 1,
      },
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
          icon: settings.view_icon.clone(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Close".to_string(),
          icon: settings.close_icon.clone(),
        },
      ],
    };

    info!(body = %notification.body, "Showing push notification");
    self.host.show_notification(notification).await
  }

  /// Dismiss the notification; the "view" action also opens a window.
  pub async fn notification_click(&self, action: Option<&str>) -> Result<()> {
    self.host.close_notification().await;

    match action {
      Some(ACTION_VIEW) => {
        let url = self.config.notification.view_url.clone();
        info!(url = %url, "Opening window from notification");
        self.host.open_window(url).await
      }
      other => {
        debug!(action = ?other, "Notification dismissed");
        Ok(())
      }
    }
  }
}
