//! File logging. The TUI owns the terminal, so tracing output goes to a daily rolling
//! file under the platform data dir unless `--log-stderr` is given.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "ypq";
const DEFAULT_FILTER: &str = "ypq=debug,warn";

/// Directory log files are written to.
pub fn log_dir() -> PathBuf {
  ProjectDirs::from("", "", "ypq")
    .map(|dirs| dirs.data_dir().join("logs"))
    .unwrap_or_else(|| std::env::temp_dir().join("ypq-logs"))
}

/// Initialize tracing. `RUST_LOG` overrides the default filter.
pub fn init_logging(to_stderr: bool) -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  if to_stderr {
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();
    return Ok(());
  }

  let dir = log_dir();
  std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create log dir {}", dir.display()))?;
  let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  // The guard flushes on drop; keep it for the life of the process.
  Box::leak(Box::new(guard));

  let fmt_layer = fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true);
  tracing_subscriber::registry().with(filter).with(fmt_layer).init();
  tracing::info!(dir = %dir.display(), "logging initialized");
  Ok(())
}
