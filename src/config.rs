use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the site the worker is registered for
  pub origin: Url,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  #[serde(default = "default_cache_version")]
  pub cache_version: String,
  /// Critical resources that must be cached before the worker serves traffic
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Take over from the previous version as soon as install completes
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  #[serde(default = "default_offline_document")]
  pub offline_document: String,
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  #[serde(default = "default_queue_name")]
  pub queue_name: String,
  #[serde(default)]
  pub notification: NotificationConfig,
  /// SQLite database location (defaults to the XDG data directory)
  pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without a payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Where the "view" action navigates to
  pub view_url: String,
  pub view_icon: String,
  pub close_icon: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "EduPlatform".to_string(),
      default_body: "New update available!".to_string(),
      icon: "/icon-192x192.png".to_string(),
      badge: "/badge-72x72.png".to_string(),
      vibrate: vec![100, 50, 100],
      view_url: "/".to_string(),
      view_icon: "/images/checkmark.png".to_string(),
      close_icon: "/images/xmark.png".to_string(),
    }
  }
}

fn default_cache_prefix() -> String {
  "eduplatform".to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_precache() -> Vec<String> {
  ["/", "/index.html", "/offline.html", "/manifest.json", "/favicon.ico"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_true() -> bool {
  true
}

fn default_offline_document() -> String {
  "/offline.html".to_string()
}

fn default_sync_tag() -> String {
  "background-sync".to_string()
}

fn default_queue_name() -> String {
  "form-submissions".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-worker/config.yaml\n\
                 with at least an `origin: https://your.site` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Location of the worker database.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage_path {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("worker.db"))
  }

  /// Build the immutable configuration handed to the worker.
  ///
  /// Every relative URL is resolved against the origin here, once.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("Origin must be an absolute http(s) URL: {}", self.origin));
    }

    let resolve = |path: &str| {
      self
        .origin
        .join(path)
        .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
    };

    let precache = self
      .precache
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;

    let n = &self.notification;
    Ok(WorkerConfig {
      origin: self.origin.clone(),
      cache_prefix: self.cache_prefix.clone(),
      cache_name: cache_name(&self.cache_prefix, &self.cache_version),
      version: self.cache_version.clone(),
      precache,
      skip_waiting_on_install: self.skip_waiting,
      offline_document: resolve(&self.offline_document)?,
      sync_tag: self.sync_tag.clone(),
      queue_name: self.queue_name.clone(),
      notification: NotificationSettings {
        title: n.title.clone(),
        default_body: n.default_body.clone(),
        icon: n.icon.clone(),
        badge: n.badge.clone(),
        vibrate: n.vibrate.clone(),
        view_url: resolve(&n.view_url)?,
        view_icon: n.view_icon.clone(),
        close_icon: n.close_icon.clone(),
      },
    })
  }
}

fn cache_name(prefix: &str, version: &str) -> String {
  format!("{}-{}", prefix, version)
}

/// Data directory for the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-worker"))
}

/// Worker configuration, fixed for the lifetime of a worker version.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub cache_prefix: String,
  /// Identifier of the current Named Cache
  pub cache_name: String,
  pub version: String,
  pub precache: Vec<Url>,
  pub skip_waiting_on_install: bool,
  pub offline_document: Url,
  pub sync_tag: String,
  pub queue_name: String,
  pub notification: NotificationSettings,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
  pub title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub view_url: Url,
  pub view_icon: String,
  pub close_icon: String,
}

impl WorkerConfig {
  /// Same-origin check used by the fetch scope filter.
  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  /// Name of the Named Cache owned by another worker version.
  pub fn cache_name_for(&self, version: &str) -> String {
    cache_name(&self.cache_prefix, version)
  }
}
