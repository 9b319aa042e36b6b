//! Snapshot storage trait and SQLite implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// A complete, previously persisted fetch result.
#[derive(Debug, Clone)]
pub struct Snapshot {
  /// Serialized item sequence, replaced wholesale on each refresh.
  pub payload: Vec<u8>,
  /// When the snapshot was written.
  pub written_at: DateTime<Utc>,
}

/// Durable key-value store for listing snapshots.
///
/// A missing key is `Ok(None)`, never an error; an entry that cannot be
/// read back is an error. `store` must replace the entry atomically with
/// respect to concurrent readers, including readers in other processes.
pub trait SnapshotStore: Send + Sync {
  fn exists(&self, key: &str) -> Result<bool>;

  fn load(&self, key: &str) -> Result<Option<Snapshot>>;

  fn store(&self, key: &str, payload: &[u8]) -> Result<()>;

  /// Age of the entry for `key`, or None if absent.
  fn age_of(&self, key: &str) -> Result<Option<Duration>>;
}

/// SQLite-backed snapshot store.
///
/// A snapshot replace is a single `INSERT OR REPLACE`, which SQLite runs in
/// its own transaction; combined with WAL mode, a reader in another process
/// sees either the old or the new payload, never a torn one.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    conn
      .pragma_update(None, "journal_mode", "WAL")
      .map_err(|e| eyre!("Failed to enable WAL mode: {}", e))?;
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hublist").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    written_at TEXT NOT NULL
);
"#;

impl SnapshotStore for SqliteStore {
  fn exists(&self, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM snapshots WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query snapshot '{}': {}", key, e))?;

    Ok(found.is_some())
  }

  fn load(&self, key: &str) -> Result<Option<Snapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT payload, written_at FROM snapshots WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load snapshot '{}': {}", key, e))?;

    match row {
      Some((payload, written_at)) => Ok(Some(Snapshot {
        payload,
        written_at: parse_timestamp(&written_at)?,
      })),
      None => Ok(None),
    }
  }

  fn store(&self, key: &str, payload: &[u8]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO snapshots (key, payload, written_at) VALUES (?, ?, ?)",
        params![key, payload, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store snapshot '{}': {}", key, e))?;

    Ok(())
  }

  fn age_of(&self, key: &str) -> Result<Option<Duration>> {
    Ok(self.load(key)?.map(|s| age_since(s.written_at)))
  }
}

/// In-memory snapshot store used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<std::collections::HashMap<String, Snapshot>>,
}

#[cfg(test)]
impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert an entry with an explicit write time, to backdate snapshots.
  pub fn store_at(&self, key: &str, payload: &[u8], written_at: DateTime<Utc>) {
    self.entries.lock().unwrap().insert(
      key.to_string(),
      Snapshot {
        payload: payload.to_vec(),
        written_at,
      },
    );
  }
}

#[cfg(test)]
impl SnapshotStore for MemoryStore {
  fn exists(&self, key: &str) -> Result<bool> {
    Ok(self.entries.lock().unwrap().contains_key(key))
  }

  fn load(&self, key: &str) -> Result<Option<Snapshot>> {
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  fn store(&self, key: &str, payload: &[u8]) -> Result<()> {
    self.store_at(key, payload, Utc::now());
    Ok(())
  }

  fn age_of(&self, key: &str) -> Result<Option<Duration>> {
    Ok(self.load(key)?.map(|s| age_since(s.written_at)))
  }
}

fn age_since(written_at: DateTime<Utc>) -> Duration {
  // Clock skew can make the entry appear to be from the future; clamp to
  // zero rather than erroring.
  (Utc::now() - written_at).to_std().unwrap_or_default()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}
