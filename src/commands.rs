//! Resource dispatch and feedback emission.

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::cache::{SnapshotCache, SqliteStore};
use crate::config::{Config, CredentialProvider, EnvCredentials};
use crate::facade::{QueryFacade, QueryOptions, QueryOutcome};
use crate::github::client::GitHubClient;
use crate::github::sources::{OpenPrsSource, ReposSource};
use crate::pager::PageSource;
use crate::refresh::{ProcessSpawner, RefreshCoordinator, DEFAULT_MAX_LOCK_AGE};

/// The listings hublist serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resource {
  /// Repositories accessible to the authenticated user
  Repos,
  /// Open pull requests authored by the authenticated user
  Prs,
}

impl Resource {
  /// Cache key; also the background job name, and thereby the subcommand
  /// the detached refresh process is re-invoked with.
  pub fn key(&self) -> &'static str {
    match self {
      Resource::Repos => "repos",
      Resource::Prs => "prs",
    }
  }

  fn max_age(&self, config: &Config) -> Duration {
    match self {
      Resource::Repos => Duration::from_secs(config.cache.repos_max_age_secs),
      Resource::Prs => Duration::from_secs(config.cache.prs_max_age_secs),
    }
  }

  fn placeholder(&self) -> &'static str {
    match self {
      Resource::Repos => "Downloading repositories…",
      Resource::Prs => "Downloading pull requests…",
    }
  }
}

/// Run one query, or with `refresh` set, one detached refresh job.
pub async fn run(resource: Resource, refresh: bool, config: &Config) -> Result<()> {
  let coordinator = RefreshCoordinator::new(
    RefreshCoordinator::default_locks_dir()?,
    DEFAULT_MAX_LOCK_AGE,
    Arc::new(ProcessSpawner),
  )?;
  // A refresh job holds its lock for its whole lifetime, early bail-outs
  // included.
  let _job = refresh.then(|| coordinator.completion_guard(resource.key()));

  let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentials);
  let client = GitHubClient::new(config, Arc::clone(&credentials))?;

  let cache = SnapshotCache::new(SqliteStore::open()?);
  let facade = QueryFacade::new(cache, coordinator, credentials, config.fetch.rerun_delay());

  let opts = QueryOptions {
    force_refresh: refresh,
    max_age: resource.max_age(config),
    first_batch_size: config.fetch.first_batch_size,
  };

  match resource {
    Resource::Repos => {
      let source = Arc::new(ReposSource::new(client));
      run_resource(&facade, source, resource, &opts).await
    }
    Resource::Prs => {
      let source = Arc::new(OpenPrsSource::new(client));
      run_resource(&facade, source, resource, &opts).await
    }
  }
}

async fn run_resource<P>(
  facade: &QueryFacade<SqliteStore>,
  source: Arc<P>,
  resource: Resource,
  opts: &QueryOptions,
) -> Result<()>
where
  P: PageSource,
  P::Item: Serialize + DeserializeOwned,
{
  let outcome = facade.query(resource.key(), source, opts).await?;
  emit(&outcome, resource)
}

#[derive(Serialize)]
struct Feedback<'a, T> {
  #[serde(skip_serializing_if = "Option::is_none")]
  items: Option<&'a [T]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  placeholder: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  rerun_after_ms: Option<u64>,
}

/// Emit feedback JSON on stdout.
///
/// Presentation, filtering and ordering are the consumer's job; we hand
/// over the items (or a placeholder) plus an optional re-poll hint.
fn emit<T: Serialize>(outcome: &QueryOutcome<T>, resource: Resource) -> Result<()> {
  let feedback = match outcome {
    QueryOutcome::Items { items, rerun_after } => Feedback {
      items: Some(items),
      placeholder: None,
      rerun_after_ms: rerun_after.map(|d| d.as_millis() as u64),
    },
    QueryOutcome::Fetching { rerun_after } => Feedback {
      items: None,
      placeholder: Some(resource.placeholder()),
      rerun_after_ms: Some(rerun_after.as_millis() as u64),
    },
    QueryOutcome::Refreshed { count } => {
      // The refresh job is detached; nobody reads its stdout.
      info!(resource = resource.key(), count = *count, "refresh complete");
      return Ok(());
    }
  };

  let line =
    serde_json::to_string(&feedback).map_err(|e| eyre!("Failed to serialize feedback: {}", e))?;
  println!("{}", line);

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resource_keys_are_distinct() {
    assert_eq!(Resource::Repos.key(), "repos");
    assert_eq!(Resource::Prs.key(), "prs");
  }

  #[test]
  fn test_max_age_comes_from_config() {
    let config: Config = serde_yaml::from_str("cache:\n  repos_max_age_secs: 7\n").unwrap();

    assert_eq!(Resource::Repos.max_age(&config), Duration::from_secs(7));
    assert_eq!(Resource::Prs.max_age(&config), Duration::from_secs(60));
  }

  #[test]
  fn test_feedback_omits_absent_fields() {
    let feedback = Feedback::<u32> {
      items: None,
      placeholder: Some("Downloading repositories…"),
      rerun_after_ms: Some(500),
    };

    let json = serde_json::to_value(&feedback).unwrap();
    assert!(json.get("items").is_none());
    assert_eq!(json["rerun_after_ms"], 500);
  }
}
