//! Cache storage trait and SQLite implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{RequestKey, ResponseSnapshot, ResponseType};

/// A response read back from a store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: ResponseSnapshot,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores. Every write replaces a whole
/// entry, so concurrent writers never need a read-modify-write cycle.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Names of all stores, oldest first.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Look up an entry. A missing store is reported as a miss.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Write an entry, replacing any previous one. Fails if the store is missing.
  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()>;

  /// Remove a single entry. Returns false if nothing was removed.
  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool>;

  /// All request keys held by a store.
  fn keys(&self, store: &str) -> Result<Vec<RequestKey>>;

  /// Generation currently marked as serving requests.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Mark a generation as serving requests.
  fn set_active_generation(&self, name: &str) -> Result<()>;
}

/// Handle to one named store.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> CacheStore<S> {
  /// Open the named store, creating it if absent.
  pub fn open(storage: Arc<S>, name: &str) -> Result<Self> {
    storage.open_store(name)?;
    Ok(Self::attach(storage, name))
  }

  /// Handle to a store without creating it.
  pub fn attach(storage: Arc<S>, name: &str) -> Self {
    Self {
      storage,
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.storage.get(&self.name, key)
  }

  pub fn put(&self, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    self.storage.put(&self.name, key, response)
  }

  pub fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.storage.delete(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.name)
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a database that lives only as long as this value.
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

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachegate").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per generation store
CREATE TABLE IF NOT EXISTS cache_stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request hash within a store
CREATE TABLE IF NOT EXISTS cache_entries (
    store_id INTEGER NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_id, request_hash),
    FOREIGN KEY (store_id) REFERENCES cache_stores(id) ON DELETE CASCADE
);

-- Process-independent worker state (active generation)
CREATE TABLE IF NOT EXISTS worker_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const ACTIVE_GENERATION: &str = "active_generation";

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;
    Ok(removed > 0)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT e.response_url, e.status, e.status_text, e.response_type, e.headers, e.body, e.cached_at
         FROM cache_entries e
         INNER JOIN cache_stores s ON s.id = e.store_id
         WHERE s.name = ? AND e.request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, String, String, Vec<u8>, String)> = stmt
      .query_row(params![store, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    let Some((url, status, status_text, response_type, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let response_type = ResponseType::parse(&response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}' for {}", response_type, key))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;

    Ok(Some(CachedResponse {
      response: ResponseSnapshot {
        url,
        status,
        status_text,
        response_type,
        headers,
        body: Bytes::from(body),
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let written = conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (store_id, request_hash, method, url, response_url, status, status_text, response_type, headers, body, cached_at)
         SELECT id, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now') FROM cache_stores WHERE name = ?",
        params![
          key.cache_hash(),
          key.method,
          key.url,
          response.url,
          response.status,
          response.status_text,
          response.response_type.as_str(),
          headers,
          &response.body[..],
          store,
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    if written == 0 {
      return Err(eyre!("Cache store {} not found", store));
    }

    Ok(())
  }

  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries
         WHERE request_hash = ? AND store_id = (SELECT id FROM cache_stores WHERE name = ?)",
        params![key.cache_hash(), store],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
    Ok(removed > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT e.method, e.url FROM cache_entries e
         INNER JOIN cache_stores s ON s.id = e.store_id
         WHERE s.name = ?
         ORDER BY e.url, e.method",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", store, e))?;

    Ok(keys)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM worker_state WHERE key = ?",
        params![ACTIVE_GENERATION],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  fn set_active_generation(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO worker_state (key, value) VALUES (?, ?)",
        params![ACTIVE_GENERATION, name],
      )
      .map_err(|e| eyre!("Failed to mark {} active: {}", name, e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
