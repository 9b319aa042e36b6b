mod cache;
mod commands;
mod config;
mod facade;
mod github;
mod pager;
mod refresh;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hublist")]
#[command(about = "Instant cached GitHub listings with detached background refresh")]
#[command(version)]
struct Args {
  /// Resource to list
  #[arg(value_enum)]
  resource: commands::Resource,

  /// Run as the background refresh job: fetch synchronously and persist,
  /// emit no feedback
  #[arg(long)]
  refresh: bool,

  /// Path to config file (default: $XDG_CONFIG_HOME/hublist/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.refresh)?;

  let config = config::Config::load(args.config.as_deref())?;

  commands::run(args.resource, args.refresh, &config).await
}

/// Interactive runs log to stderr. The refresh job runs detached with no
/// terminal attached, so its logs go to a file under the data directory;
/// a failed refresh is visible nowhere else.
fn init_tracing(refresh_job: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let default_level = if refresh_job { "info" } else { "warn" };
  let filter =
    EnvFilter::try_from_env("HUBLIST_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

  if refresh_job {
    let log_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?
      .join("hublist")
      .join("logs");
    std::fs::create_dir_all(&log_dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

    let appender = tracing_appender::rolling::daily(log_dir, "refresh.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();

    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();

    Ok(None)
  }
}
