//! Concurrent paginated fetching.
//!
//! Listings are pulled in two phases: a fixed-size first batch of pages
//! requested concurrently (cheap for the common case of a short listing),
//! then a sequential walk for whatever lies past the batch. The sequential
//! phase exists because a page request past the batch is only known to be
//! valid once the previous page has reported that more data exists.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

/// One bounded unit of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Whether the source reported further pages after this one.
  pub has_more: bool,
}

/// A paginated listing endpoint.
///
/// Implementations must be safe to call concurrently for different page
/// numbers, and must treat a request past the end of the listing as an
/// empty page with `has_more = false` rather than an error.
pub trait PageSource: Send + Sync + 'static {
  type Item: Send + 'static;

  /// Fetch one page. Pages are numbered from 1.
  fn fetch_page(&self, page: u32) -> BoxFuture<'_, Result<Page<Self::Item>>>;
}

/// Fetch every page of a listing and merge the items.
///
/// The first `first_batch_size` pages are requested concurrently and
/// collected in arrival order, so the merged sequence carries no inter-page
/// ordering; consumers sort or filter downstream.
///
/// Any single page failure aborts the whole fetch. Callers persist the
/// result wholesale and a partial listing must never be committed, so an
/// explicit failure beats recovering the pages that did succeed.
pub async fn fetch_all<S: PageSource>(
  source: Arc<S>,
  first_batch_size: u32,
) -> Result<Vec<S::Item>> {
  let first_batch_size = first_batch_size.max(1);
  let (tx, mut rx) = mpsc::channel(first_batch_size as usize);

  debug!(pages = first_batch_size, "fetching first batch concurrently");
  for page in 1..=first_batch_size {
    let source = Arc::clone(&source);
    let tx = tx.clone();
    tokio::spawn(async move {
      let fetched = source.fetch_page(page).await;
      // The collector hangs up early when the batch fails; nothing to do then.
      let _ = tx.send(fetched).await;
    });
  }
  drop(tx);

  let mut items = Vec::new();
  let mut end_reached = false;
  for _ in 0..first_batch_size {
    let fetched = rx
      .recv()
      .await
      .ok_or_else(|| eyre!("page fetch task exited without reporting a result"))??;
    if !fetched.has_more {
      end_reached = true;
    }
    items.extend(fetched.items);
  }

  if end_reached {
    return Ok(items);
  }

  debug!(
    from = first_batch_size + 1,
    "fetching remaining pages sequentially"
  );
  let mut page = first_batch_size + 1;
  loop {
    let fetched = source.fetch_page(page).await?;
    items.extend(fetched.items);
    if !fetched.has_more {
      break;
    }
    page += 1;
  }

  Ok(items)
}
