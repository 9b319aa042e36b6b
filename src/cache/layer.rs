//! Staleness-aware snapshot cache over a storage backend.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};

use super::storage::SnapshotStore;

/// Snapshot cache keyed by logical resource name.
///
/// The cache answers reads from whatever snapshot is present, however old;
/// staleness is only ever reported to the caller, never used to withhold
/// data. Each successful refresh replaces the snapshot wholesale.
pub struct SnapshotCache<S: SnapshotStore> {
  store: Arc<S>,
}

impl<S: SnapshotStore> SnapshotCache<S> {
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  #[allow(dead_code)]
  pub fn exists(&self, key: &str) -> Result<bool> {
    self.store.exists(key)
  }

  /// Load and deserialize the snapshot for `key`.
  ///
  /// A missing entry is `Ok(None)`. A payload that fails to deserialize is
  /// an error rather than a miss: it usually means a format mismatch, which
  /// a silent re-fetch would keep masking.
  pub fn load_items<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    match self.store.load(key)? {
      Some(snapshot) => {
        let items = serde_json::from_slice(&snapshot.payload)
          .map_err(|e| eyre!("Cached snapshot '{}' is corrupt: {}", key, e))?;
        Ok(Some(items))
      }
      None => Ok(None),
    }
  }

  /// Serialize `items` and persist them as the new snapshot for `key`.
  pub fn store_items<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
    let payload = serde_json::to_vec(items)
      .map_err(|e| eyre!("Failed to serialize snapshot '{}': {}", key, e))?;
    self.store.store(key, &payload)
  }

  /// Whether the snapshot for `key` is older than `max_age`.
  ///
  /// An absent key is always stale.
  pub fn is_stale(&self, key: &str, max_age: Duration) -> Result<bool> {
    Ok(match self.store.age_of(key)? {
      Some(age) => age > max_age,
      None => true,
    })
  }
}

impl<S: SnapshotStore> Clone for SnapshotCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use chrono::Utc;

  const MAX_AGE: Duration = Duration::from_secs(60);

  fn backdated(store: &MemoryStore, key: &str, payload: &[u8], seconds_ago: i64) {
    store.store_at(key, payload, Utc::now() - chrono::Duration::seconds(seconds_ago));
  }

  #[test]
  fn test_roundtrip() {
    let cache = SnapshotCache::new(MemoryStore::new());

    cache.store_items("repos", &[1u32, 2, 3]).unwrap();
    let items: Vec<u32> = cache.load_items("repos").unwrap().unwrap();
    assert_eq!(items, vec![1, 2, 3]);
  }

  #[test]
  fn test_missing_key_is_none() {
    let cache = SnapshotCache::new(MemoryStore::new());
    assert!(cache.load_items::<u32>("repos").unwrap().is_none());
  }

  #[test]
  fn test_fresh_snapshot_is_not_stale() {
    let store = MemoryStore::new();
    backdated(&store, "repos", b"[]", 59);

    let cache = SnapshotCache::new(store);
    assert!(!cache.is_stale("repos", MAX_AGE).unwrap());
  }

  #[test]
  fn test_old_snapshot_is_stale() {
    let store = MemoryStore::new();
    backdated(&store, "repos", b"[]", 61);

    let cache = SnapshotCache::new(store);
    assert!(cache.is_stale("repos", MAX_AGE).unwrap());
  }

  #[test]
  fn test_absent_key_is_always_stale() {
    let cache = SnapshotCache::new(MemoryStore::new());
    assert!(cache.is_stale("repos", MAX_AGE).unwrap());
  }

  #[test]
  fn test_corrupt_payload_is_an_error_not_a_miss() {
    let store = MemoryStore::new();
    store.store("repos", b"not json").unwrap();

    let cache = SnapshotCache::new(store);
    let err = cache.load_items::<u32>("repos").unwrap_err();
    assert!(err.to_string().contains("corrupt"));
  }
}
