//! Single-flight background refresh coordination.
//!
//! The querying process and the refresh job are separate executions, so the
//! one-job-per-resource invariant lives in a lock file rather than an
//! in-process flag. The lock is created with `O_EXCL` before the job is
//! spawned, removed by the job when it exits (success or failure), and
//! reclaimed by age if the job died without cleaning up.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

/// A lock that outlives this bound is assumed to belong to a job that died
/// without releasing it.
pub const DEFAULT_MAX_LOCK_AGE: Duration = Duration::from_secs(300);

/// Spawns the detached process that performs a refresh job.
pub trait JobSpawner: Send + Sync {
  /// Start the background job for `name`. Must not block on completion.
  fn spawn(&self, name: &str) -> Result<()>;
}

/// Re-invokes the current executable as `hublist <name> --refresh`,
/// detached from the calling process. Job names double as the resource
/// subcommand.
pub struct ProcessSpawner;

impl JobSpawner for ProcessSpawner {
  fn spawn(&self, name: &str) -> Result<()> {
    let exe = std::env::current_exe()
      .map_err(|e| eyre!("Failed to locate current executable: {}", e))?;

    let child = std::process::Command::new(exe)
      .arg(name)
      .arg("--refresh")
      .stdin(std::process::Stdio::null())
      .stdout(std::process::Stdio::null())
      .stderr(std::process::Stdio::null())
      .spawn()
      .map_err(|e| eyre!("Failed to spawn refresh job '{}': {}", name, e))?;

    info!(job = name, pid = child.id(), "spawned background refresh");
    Ok(())
  }
}

/// Coordinates at most one in-flight background refresh per resource key.
#[derive(Clone)]
pub struct RefreshCoordinator {
  locks_dir: PathBuf,
  max_lock_age: Duration,
  spawner: Arc<dyn JobSpawner>,
}

impl RefreshCoordinator {
  pub fn new(
    locks_dir: PathBuf,
    max_lock_age: Duration,
    spawner: Arc<dyn JobSpawner>,
  ) -> Result<Self> {
    std::fs::create_dir_all(&locks_dir)
      .map_err(|e| eyre!("Failed to create locks directory {}: {}", locks_dir.display(), e))?;

    Ok(Self {
      locks_dir,
      max_lock_age,
      spawner,
    })
  }

  /// Get the default directory for job lock files.
  pub fn default_locks_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hublist").join("jobs"))
  }

  /// Start a background refresh for `name` unless one is already running.
  ///
  /// Returns whether a new job was spawned. An already-running job is not
  /// an error; it is logged and left alone.
  pub fn ensure_refreshing(&self, name: &str) -> Result<bool> {
    if !self.try_lock(name)? {
      debug!(job = name, "refresh job already running, not spawning");
      return Ok(false);
    }

    if let Err(e) = self.spawner.spawn(name) {
      // Leave no lock behind for a job that never started.
      self.complete(name)?;
      return Err(e);
    }

    Ok(true)
  }

  /// Whether a live refresh job for `name` holds the lock.
  #[allow(dead_code)]
  pub fn is_job_running(&self, name: &str) -> Result<bool> {
    let path = self.lock_path(name);
    if !path.exists() {
      return Ok(false);
    }
    Ok(!self.lock_is_stale(&path)?)
  }

  /// Release the job lock for `name`. Releasing an absent lock is a no-op.
  pub fn complete(&self, name: &str) -> Result<()> {
    match std::fs::remove_file(self.lock_path(name)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove lock for job '{}': {}", name, e)),
    }
  }

  /// Guard that releases the job lock for `name` when dropped.
  ///
  /// Held by the refresh process itself, so the lock disappears whether the
  /// refresh succeeds or bails out with an error.
  pub fn completion_guard(&self, name: &str) -> JobGuard {
    JobGuard {
      coordinator: self.clone(),
      name: name.to_string(),
    }
  }

  fn lock_path(&self, name: &str) -> PathBuf {
    self.locks_dir.join(format!("{}.lock", name))
  }

  fn try_lock(&self, name: &str) -> Result<bool> {
    let path = self.lock_path(name);

    // One retry: if the existing lock is stale we remove it and race other
    // processes for the fresh one.
    for _ in 0..2 {
      match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
      {
        Ok(mut file) => {
          let _ = writeln!(file, "{}", std::process::id());
          return Ok(true);
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          if !self.lock_is_stale(&path)? {
            return Ok(false);
          }
          warn!(job = name, "reclaiming stale refresh lock");
          // Another process may win the removal race; the retry sorts it out.
          let _ = std::fs::remove_file(&path);
          continue;
        }
        Err(e) => {
          return Err(eyre!("Failed to create lock file {}: {}", path.display(), e));
        }
      }
    }

    Ok(false)
  }

  fn lock_is_stale(&self, path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
      Ok(meta) => {
        let age = meta
          .modified()
          .ok()
          .and_then(|m| m.elapsed().ok())
          .unwrap_or_default();
        Ok(age > self.max_lock_age)
      }
      // Released between the existence check and here.
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
      Err(e) => Err(eyre!("Failed to stat lock file {}: {}", path.display(), e)),
    }
  }
}

/// See [`RefreshCoordinator::completion_guard`].
pub struct JobGuard {
  coordinator: RefreshCoordinator,
  name: String,
}

impl Drop for JobGuard {
  fn drop(&mut self) {
    if let Err(e) = self.coordinator.complete(&self.name) {
      warn!(job = %self.name, error = %e, "failed to remove job lock");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct CountingSpawner {
    spawned: AtomicUsize,
  }

  impl JobSpawner for CountingSpawner {
    fn spawn(&self, _name: &str) -> Result<()> {
      self.spawned.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct FailingSpawner;

  impl JobSpawner for FailingSpawner {
    fn spawn(&self, name: &str) -> Result<()> {
      Err(eyre!("cannot start job '{}'", name))
    }
  }

  fn coordinator(
    dir: &tempfile::TempDir,
    max_lock_age: Duration,
  ) -> (RefreshCoordinator, Arc<CountingSpawner>) {
    let spawner = Arc::new(CountingSpawner::default());
    let coordinator = RefreshCoordinator::new(
      dir.path().to_path_buf(),
      max_lock_age,
      Arc::clone(&spawner) as Arc<dyn JobSpawner>,
    )
    .unwrap();
    (coordinator, spawner)
  }

  #[test]
  fn test_second_trigger_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    assert!(!coordinator.ensure_refreshing("repos").unwrap());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    assert!(coordinator.is_job_running("repos").unwrap());
  }

  #[test]
  fn test_keys_lock_independently() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    assert!(coordinator.ensure_refreshing("prs").unwrap());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_complete_allows_next_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    coordinator.complete("repos").unwrap();
    assert!(!coordinator.is_job_running("repos").unwrap());

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_guard_releases_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    {
      let _guard = coordinator.completion_guard("repos");
    }
    assert!(!coordinator.is_job_running("repos").unwrap());
  }

  #[test]
  fn test_stale_lock_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, spawner) = coordinator(&dir, Duration::from_millis(10));

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    std::thread::sleep(Duration::from_millis(50));

    assert!(coordinator.ensure_refreshing("repos").unwrap());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_failed_spawn_leaves_no_lock() {
    let dir = tempfile::tempdir().unwrap();
    let failing = RefreshCoordinator::new(
      dir.path().to_path_buf(),
      DEFAULT_MAX_LOCK_AGE,
      Arc::new(FailingSpawner),
    )
    .unwrap();

    assert!(failing.ensure_refreshing("repos").is_err());
    assert!(!failing.is_job_running("repos").unwrap());

    let (coordinator, spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);
    assert!(coordinator.ensure_refreshing("repos").unwrap());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_concurrent_triggers_spawn_exactly_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, spawner) = coordinator(&dir, DEFAULT_MAX_LOCK_AGE);

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let coordinator = coordinator.clone();
        std::thread::spawn(move || coordinator.ensure_refreshing("repos").unwrap())
      })
      .collect();

    let spawned: usize = handles
      .into_iter()
      .map(|h| h.join().unwrap() as usize)
      .sum();

    assert_eq!(spawned, 1);
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
  }
}
