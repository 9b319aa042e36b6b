use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GithubConfig,
  #[serde(default)]
  pub fetch: FetchConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
  /// Base URL of the GitHub REST API (override for GitHub Enterprise)
  #[serde(default = "default_api_url")]
  pub api_url: String,
  /// Items requested per page
  #[serde(default = "default_per_page")]
  pub per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
  /// Pages fetched concurrently before falling back to sequential paging
  #[serde(default = "default_first_batch_size")]
  pub first_batch_size: u32,
  /// Delay suggested to the consumer before re-querying, whenever a
  /// background refresh was triggered
  #[serde(default = "default_rerun_delay_ms")]
  pub rerun_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Snapshot age after which the repository listing is refreshed
  #[serde(default = "default_repos_max_age_secs")]
  pub repos_max_age_secs: u64,
  /// Snapshot age after which the pull request listing is refreshed
  #[serde(default = "default_prs_max_age_secs")]
  pub prs_max_age_secs: u64,
}

fn default_api_url() -> String {
  "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
  100
}

fn default_first_batch_size() -> u32 {
  4
}

fn default_rerun_delay_ms() -> u64 {
  500
}

fn default_repos_max_age_secs() -> u64 {
  5
}

fn default_prs_max_age_secs() -> u64 {
  60
}

impl Default for GithubConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      per_page: default_per_page(),
    }
  }
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      first_batch_size: default_first_batch_size(),
      rerun_delay_ms: default_rerun_delay_ms(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      repos_max_age_secs: default_repos_max_age_secs(),
      prs_max_age_secs: default_prs_max_age_secs(),
    }
  }
}

impl FetchConfig {
  pub fn rerun_delay(&self) -> Duration {
    Duration::from_millis(self.rerun_delay_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hublist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hublist/config.yaml
  ///
  /// Every field has a default, so a missing config file just yields the
  /// default configuration.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hublist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hublist").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

/// Supplies the GitHub access token.
///
/// Queries that would trigger a refresh check this first: spawning a job
/// that is certain to fail on authentication helps nobody.
pub trait CredentialProvider: Send + Sync {
  /// The token, or a "not logged in" error telling the user what to set.
  fn token(&self) -> Result<String>;
}

/// Reads the token from environment variables.
///
/// Checks HUBLIST_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
  fn token(&self) -> Result<String> {
    std::env::var("HUBLIST_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .map_err(|_| {
        eyre!("Not logged in. Set the HUBLIST_GITHUB_TOKEN or GITHUB_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config: Config = serde_yaml::from_str("{}").unwrap();

    assert_eq!(config.github.api_url, "https://api.github.com");
    assert_eq!(config.github.per_page, 100);
    assert_eq!(config.fetch.first_batch_size, 4);
    assert_eq!(config.cache.repos_max_age_secs, 5);
    assert_eq!(config.cache.prs_max_age_secs, 60);
  }

  #[test]
  fn test_partial_config_overrides() {
    let config: Config = serde_yaml::from_str(
      "github:\n  api_url: https://github.example.com/api/v3\ncache:\n  repos_max_age_secs: 120\n",
    )
    .unwrap();

    assert_eq!(config.github.api_url, "https://github.example.com/api/v3");
    assert_eq!(config.cache.repos_max_age_secs, 120);
    // Untouched sections keep their defaults.
    assert_eq!(config.fetch.first_batch_size, 4);
    assert_eq!(config.cache.prs_max_age_secs, 60);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/hublist.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
