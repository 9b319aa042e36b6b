//! Serde types for the GitHub listings we cache.
//!
//! Only the fields the feedback consumer cares about are kept; everything
//! else in the API response is dropped at deserialization. The same structs
//! are what gets serialized into snapshots, so they round-trip.

use serde::{Deserialize, Serialize};

/// A repository the authenticated user can access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
  pub full_name: String,
  pub html_url: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub stargazers_count: u64,
  #[serde(default)]
  pub pushed_at: Option<String>,
}

/// An open pull request authored by the authenticated user.
///
/// Pull requests come back through the issue search endpoint, so this is
/// the issue shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
  pub id: u64,
  pub title: String,
  pub html_url: String,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_repository_ignores_unknown_fields() {
    let json = r#"{
      "id": 1296269,
      "full_name": "octocat/Hello-World",
      "html_url": "https://github.com/octocat/Hello-World",
      "description": "My first repository",
      "stargazers_count": 80,
      "pushed_at": "2024-01-26T19:06:43Z",
      "fork": false,
      "owner": {"login": "octocat"}
    }"#;

    let repo: Repository = serde_json::from_str(json).unwrap();
    assert_eq!(repo.full_name, "octocat/Hello-World");
    assert_eq!(repo.stargazers_count, 80);
  }

  #[test]
  fn test_repository_tolerates_missing_optional_fields() {
    let json = r#"{
      "full_name": "octocat/Hello-World",
      "html_url": "https://github.com/octocat/Hello-World",
      "description": null
    }"#;

    let repo: Repository = serde_json::from_str(json).unwrap();
    assert!(repo.description.is_none());
    assert_eq!(repo.stargazers_count, 0);
  }

  #[test]
  fn test_pull_request_snapshot_roundtrip() {
    let pr = PullRequest {
      id: 42,
      title: "Fix the thing".to_string(),
      html_url: "https://github.com/octocat/Hello-World/pull/42".to_string(),
      updated_at: Some("2024-01-26T19:06:43Z".to_string()),
    };

    let payload = serde_json::to_vec(&[pr.clone()]).unwrap();
    let restored: Vec<PullRequest> = serde_json::from_slice(&payload).unwrap();
    assert_eq!(restored, vec![pr]);
  }
}
