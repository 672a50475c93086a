//! SQLite implementation of the worker storage traits.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::{
  CacheStorage, LifecycleStore, PendingSubmission, SubmissionQueue, VersionRecord, WorkerState,
};
use crate::http::{CachedResponse, Headers, Request, RequestMode};

/// SQLite-based worker storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open worker database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Storage that lives only as long as the value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (cache, request); replaced on every write
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE TABLE IF NOT EXISTS pending_submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    queued_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (queue, request_key)
);

CREATE TABLE IF NOT EXISTS worker_versions (
    version TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    skip_waiting INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  request: &Request,
  response: &CachedResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_key, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        request.cache_key(),
        response.url,
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", response.url, e))?;

  Ok(())
}

fn ensure_cache(conn: &Connection, cache_name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, cache_name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, cache_name)
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, cache_name: &str, request: &Request, response: &CachedResponse) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, cache_name)?;
    insert_entry(&conn, cache_name, request, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, CachedResponse)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache_name)?;
    for (request, response) in entries {
      insert_entry(&tx, cache_name, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn lookup(&self, cache_name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<(String, u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT url, status, status_text, headers, body FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
        params![cache_name, request.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    match row {
      Some((url, status, status_text, headers, body)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;
        Ok(Some(CachedResponse {
          url,
          status,
          status_text,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![cache_name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", cache_name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }
}

impl SubmissionQueue for SqliteStorage {
  fn enqueue(&self, queue: &str, request: &Request) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO pending_submissions (queue, request_key, method, url, headers, body)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          queue,
          request.submission_key(),
          request.method.as_str(),
          request.url.as_str(),
          headers,
          request.body,
        ],
      )
      .map_err(|e| eyre!("Failed to queue submission to {}: {}", request.url, e))?;

    Ok(())
  }

  fn pending(&self, queue: &str) -> Result<Vec<PendingSubmission>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, queued_at FROM pending_submissions
         WHERE queue = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (i64, String, String, String, Option<Vec<u8>>, String);
    let rows: Vec<Row> = stmt
      .query_map(params![queue], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read queue {}: {}", queue, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queued submission: {}", e))?;

    rows
      .into_iter()
      .map(|(id, method, url, headers, body, queued_at)| -> Result<PendingSubmission> {
        let method = Method::from_bytes(method.as_bytes())
          .map_err(|e| eyre!("Invalid method '{}' in queue: {}", method, e))?;
        let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL '{}' in queue: {}", url, e))?;
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

        Ok(PendingSubmission {
          id,
          request: Request {
            url,
            method,
            mode: RequestMode::Cors,
            headers,
            body,
          },
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, queue: &str, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM pending_submissions WHERE queue = ? AND id = ?",
        params![queue, id],
      )
      .map_err(|e| eyre!("Failed to remove submission {}: {}", id, e))?;
    Ok(())
  }
}

impl LifecycleStore for SqliteStorage {
  fn load_version(&self, version: &str) -> Result<Option<VersionRecord>> {
    let conn = self.lock()?;
    let row: Option<(String, bool)> = conn
      .query_row(
        "SELECT state, skip_waiting FROM worker_versions WHERE version = ?",
        params![version],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load worker version {}: {}", version, e))?;

    row
      .map(|(state, skip_waiting)| -> Result<VersionRecord> {
        let state = state.parse::<WorkerState>().map_err(|e| eyre!("{}", e))?;
        Ok(VersionRecord {
          state,
          skip_waiting,
        })
      })
      .transpose()
  }

  fn save_version(&self, version: &str, record: VersionRecord) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO worker_versions (version, state, skip_waiting, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![version, record.state.as_str(), record.skip_waiting],
      )
      .map_err(|e| eyre!("Failed to save worker version {}: {}", version, e))?;
    Ok(())
  }

  fn forget_other_versions(&self, keep: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM worker_versions WHERE version != ?", params![keep])
      .map_err(|e| eyre!("Failed to forget old worker versions: {}", e))?;
    Ok(())
  }

  fn active_version(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT version FROM worker_versions WHERE state = ? LIMIT 1",
        params![WorkerState::Activated.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to find active worker version: {}", e))
  }

  fn versions(&self) -> Result<Vec<(String, VersionRecord)>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT version, state, skip_waiting FROM worker_versions ORDER BY version")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, bool>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list worker versions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read worker version: {}", e))?;

    rows
      .into_iter()
      .map(|(version, state, skip_waiting)| -> Result<(String, VersionRecord)> {
        let state = state.parse::<WorkerState>().map_err(|e| eyre!("{}", e))?;
        Ok((
          version,
          VersionRecord {
            state,
            skip_waiting,
          },
        ))
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
