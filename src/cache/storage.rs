//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::namespace::{CacheNamespace, CachedEntry, RequestKey};
use crate::http::AgentResponse;

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Create a namespace if it does not exist yet.
  fn open_namespace(&self, namespace: &CacheNamespace) -> Result<()>;

  /// Names of every namespace currently stored.
  fn list_namespaces(&self) -> Result<Vec<String>>;

  /// Look up a stored response.
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store a response, overwriting any previous entry for the same key.
  fn put(&self, namespace: &CacheNamespace, key: &RequestKey, response: &AgentResponse)
    -> Result<()>;

  /// Store a batch of responses. Either all are stored or none are.
  fn put_all(&self, namespace: &CacheNamespace, entries: &[(RequestKey, AgentResponse)])
    -> Result<()>;

  /// Delete every namespace not named in `keep`, returning the deleted names.
  /// The purge is a single atomic step.
  fn retain_namespaces(&self, keep: &[&str]) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// In-memory database, gone when the storage is dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_hash)
);
"#;

fn insert_namespace(conn: &Connection, namespace: &CacheNamespace) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name, kind, version) VALUES (?, ?, ?)",
      params![namespace.name, namespace.kind.as_str(), namespace.version],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace.name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  namespace: &str,
  key: &RequestKey,
  response: &AgentResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_hash, method, url, status, kind, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.kind.as_str(),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, namespace, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_namespace(&self, namespace: &CacheNamespace) -> Result<()> {
    let conn = self.lock()?;
    insert_namespace(&conn, namespace)
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, kind, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![namespace, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let Some((status, kind, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let response = AgentResponse {
      status,
      kind: kind.parse().map_err(|e: String| eyre!(e))?,
      headers: serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
      body,
    };

    Ok(Some(CachedEntry {
      key: key.clone(),
      response,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(
    &self,
    namespace: &CacheNamespace,
    key: &RequestKey,
    response: &AgentResponse,
  ) -> Result<()> {
    let conn = self.lock()?;
    insert_namespace(&conn, namespace)?;
    insert_entry(&conn, &namespace.name, key, response)
  }

  fn put_all(
    &self,
    namespace: &CacheNamespace,
    entries: &[(RequestKey, AgentResponse)],
  ) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_namespace(&tx, namespace)?;
    for (key, response) in entries {
      insert_entry(&tx, &namespace.name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn retain_namespaces(&self, keep: &[&str]) -> Result<Vec<String>> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let stale: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT name FROM cache_namespaces")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;
      names
        .into_iter()
        .filter(|name| !keep.contains(&name.as_str()))
        .collect()
    };

    for name in &stale {
      tx.execute("DELETE FROM cache_entries WHERE namespace = ?", params![name])
        .map_err(|e| eyre!("Failed to purge entries of {}: {}", name, e))?;
      tx.execute("DELETE FROM cache_namespaces WHERE name = ?", params![name])
        .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(stale)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
