//! Page sources over the GitHub client.

use color_eyre::Result;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use super::client::GitHubClient;
use super::types::{PullRequest, Repository};
use crate::pager::{Page, PageSource};

/// Repositories accessible to the authenticated user.
pub struct ReposSource {
  client: GitHubClient,
}

impl ReposSource {
  pub fn new(client: GitHubClient) -> Self {
    Self { client }
  }
}

impl PageSource for ReposSource {
  type Item = Repository;

  fn fetch_page(&self, page: u32) -> BoxFuture<'_, Result<Page<Repository>>> {
    Box::pin(self.client.repos_page(page))
  }
}

/// Open pull requests authored by the authenticated user.
///
/// The search query needs the user's login, which is resolved once on
/// first use and shared by the concurrent page fetches.
pub struct OpenPrsSource {
  client: GitHubClient,
  login: OnceCell<String>,
}

impl OpenPrsSource {
  pub fn new(client: GitHubClient) -> Self {
    Self {
      client,
      login: OnceCell::new(),
    }
  }
}

impl PageSource for OpenPrsSource {
  type Item = PullRequest;

  fn fetch_page(&self, page: u32) -> BoxFuture<'_, Result<Page<PullRequest>>> {
    Box::pin(async move {
      let login = self
        .login
        .get_or_try_init(|| self.client.current_user())
        .await?;
      self.client.open_prs_page(login, page).await
    })
  }
}
