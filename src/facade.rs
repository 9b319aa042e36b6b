//! Synchronous query entry point.
//!
//! A query answers from the snapshot cache without ever waiting on the
//! network: present data is returned as-is, stale data additionally
//! triggers a detached background refresh, and absent data yields a
//! "fetching" placeholder. The refresh job itself runs through the same
//! facade with `force_refresh` set.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cache::{SnapshotCache, SnapshotStore};
use crate::config::CredentialProvider;
use crate::pager::{self, PageSource};
use crate::refresh::RefreshCoordinator;

/// How a query should behave.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
  /// Run the full fetch synchronously and persist it instead of answering
  /// from cache. This is the mode the detached refresh job runs in.
  pub force_refresh: bool,
  /// Snapshot age beyond which a background refresh is triggered.
  pub max_age: Duration,
  /// Pages fetched concurrently at the start of a full fetch.
  pub first_batch_size: u32,
}

/// Result of a query.
#[derive(Debug)]
pub enum QueryOutcome<T> {
  /// Cached items, served regardless of freshness. `rerun_after` is set
  /// when a refresh was triggered and the consumer should poll again soon.
  Items {
    items: Vec<T>,
    rerun_after: Option<Duration>,
  },
  /// No snapshot exists yet; a refresh was triggered.
  Fetching { rerun_after: Duration },
  /// A forced refresh completed and was persisted; no items are yielded.
  Refreshed { count: usize },
}

pub struct QueryFacade<S: SnapshotStore> {
  cache: SnapshotCache<S>,
  coordinator: RefreshCoordinator,
  credentials: Arc<dyn CredentialProvider>,
  rerun_delay: Duration,
}

impl<S: SnapshotStore> QueryFacade<S> {
  pub fn new(
    cache: SnapshotCache<S>,
    coordinator: RefreshCoordinator,
    credentials: Arc<dyn CredentialProvider>,
    rerun_delay: Duration,
  ) -> Self {
    Self {
      cache,
      coordinator,
      credentials,
      rerun_delay,
    }
  }

  /// Answer a query for `key`.
  ///
  /// Without `force_refresh` this never touches `source`: data comes from
  /// the snapshot cache or not at all, and refreshing happens in a separate
  /// process.
  pub async fn query<P>(
    &self,
    key: &str,
    source: Arc<P>,
    opts: &QueryOptions,
  ) -> Result<QueryOutcome<P::Item>>
  where
    P: PageSource,
    P::Item: Serialize + DeserializeOwned,
  {
    if opts.force_refresh {
      let count = self.refresh_now(key, source, opts.first_batch_size).await?;
      return Ok(QueryOutcome::Refreshed { count });
    }

    match self.cache.load_items::<P::Item>(key)? {
      Some(items) => {
        let rerun_after = if self.cache.is_stale(key, opts.max_age)? {
          debug!(key, "snapshot is stale, triggering background refresh");
          self.trigger_refresh(key)?;
          Some(self.rerun_delay)
        } else {
          None
        };

        Ok(QueryOutcome::Items { items, rerun_after })
      }
      None => {
        debug!(key, "no snapshot yet, triggering background refresh");
        self.trigger_refresh(key)?;
        Ok(QueryOutcome::Fetching {
          rerun_after: self.rerun_delay,
        })
      }
    }
  }

  /// Fetch the full listing now and persist it as the new snapshot.
  ///
  /// Nothing is written unless the whole fetch succeeded.
  pub async fn refresh_now<P>(
    &self,
    key: &str,
    source: Arc<P>,
    first_batch_size: u32,
  ) -> Result<usize>
  where
    P: PageSource,
    P::Item: Serialize + DeserializeOwned,
  {
    let items = pager::fetch_all(source, first_batch_size).await?;
    self.cache.store_items(key, &items)?;
    info!(key, count = items.len(), "snapshot refreshed");
    Ok(items.len())
  }

  /// Spawn a background refresh for `key` unless one is already running.
  ///
  /// Fails fatally when no credentials are available: the job would only
  /// ever die on authentication, so the user is told to log in instead.
  fn trigger_refresh(&self, key: &str) -> Result<()> {
    self.credentials.token()?;
    self.coordinator.ensure_refreshing(key)?;
    Ok(())
  }
}
