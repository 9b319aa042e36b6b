//! GitHub REST API client.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderValue, ACCEPT, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::types::{PullRequest, Repository};
use crate::config::{Config, CredentialProvider};
use crate::pager::Page;

/// Thin client over the GitHub REST endpoints we list from.
///
/// Whether more pages exist is read from the `Link` header: GitHub
/// advertises a `rel="next"` target on every page but the last, and a page
/// past the end of a listing comes back as an empty array without one.
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  base: Url,
  credentials: Arc<dyn CredentialProvider>,
  per_page: u32,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
  login: String,
}

#[derive(Debug, Deserialize)]
struct ApiSearchIssuesResponse {
  items: Vec<PullRequest>,
}

impl GitHubClient {
  /// Build a client. The token is resolved per request, not here: a query
  /// answered purely from cache must work logged out.
  pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("hublist/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let mut base = Url::parse(&config.github.api_url)
      .map_err(|e| eyre!("Invalid GitHub API URL '{}': {}", config.github.api_url, e))?;
    // Url::join drops the last path segment without a trailing slash.
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    Ok(Self {
      http,
      base,
      credentials,
      per_page: config.github.per_page,
    })
  }

  /// Login of the authenticated user. Doubles as a token validity check.
  pub async fn current_user(&self) -> Result<String> {
    let url = self
      .base
      .join("user")
      .map_err(|e| eyre!("Failed to build user URL: {}", e))?;

    let (user, _): (ApiUser, bool) = self.get_paged(url).await?;
    Ok(user.login)
  }

  /// One page of repositories accessible to the user, most recently pushed
  /// first.
  pub async fn repos_page(&self, page: u32) -> Result<Page<Repository>> {
    let mut url = self
      .base
      .join("user/repos")
      .map_err(|e| eyre!("Failed to build repos URL: {}", e))?;
    url
      .query_pairs_mut()
      .append_pair("sort", "pushed")
      .append_pair("direction", "desc")
      .append_pair("per_page", &self.per_page.to_string())
      .append_pair("page", &page.to_string());

    let (items, has_more): (Vec<Repository>, bool) = self.get_paged(url).await?;
    debug!(page, count = items.len(), "fetched repository page");

    Ok(Page { items, has_more })
  }

  /// One page of the user's open pull requests, most recently updated
  /// first.
  pub async fn open_prs_page(&self, login: &str, page: u32) -> Result<Page<PullRequest>> {
    let mut url = self
      .base
      .join("search/issues")
      .map_err(|e| eyre!("Failed to build search URL: {}", e))?;
    url
      .query_pairs_mut()
      .append_pair("q", &format!("is:pr state:open author:{}", login))
      .append_pair("sort", "updated")
      .append_pair("order", "desc")
      .append_pair("per_page", &self.per_page.to_string())
      .append_pair("page", &page.to_string());

    let (response, has_more): (ApiSearchIssuesResponse, bool) = self.get_paged(url).await?;
    debug!(
      page,
      count = response.items.len(),
      "fetched pull request page"
    );

    Ok(Page {
      items: response.items,
      has_more,
    })
  }

  /// GET a JSON endpoint and report whether a next page exists.
  async fn get_paged<T: DeserializeOwned>(&self, url: Url) -> Result<(T, bool)> {
    let token = self.credentials.token()?;

    let response = self
      .http
      .get(url.clone())
      .bearer_auth(&token)
      .header(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
      )
      .send()
      .await
      .map_err(|e| eyre!("GitHub request to {} failed: {}", url, e))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
      return Err(eyre!(
        "GitHub rejected the access token. Log in again with a valid token."
      ));
    }
    if !status.is_success() {
      return Err(eyre!("GitHub responded with {} for {}", status, url));
    }

    let has_more = response
      .headers()
      .get(LINK)
      .and_then(|v| v.to_str().ok())
      .map(has_next_page)
      .unwrap_or(false);

    let body = response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse GitHub response from {}: {}", url, e))?;

    Ok((body, has_more))
  }
}

/// Whether a `Link` header advertises a next page.
fn has_next_page(link: &str) -> bool {
  link.split(',').any(|part| part.contains(r#"rel="next""#))
}
