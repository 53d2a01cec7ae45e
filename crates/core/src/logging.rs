//! File-only structured logging.
//!
//! The terminal belongs to the dashboard while it runs, so every event goes to
//! a daily rolling JSON file under the log directory instead of stderr.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{default_config_dir, ConfigError};

pub const LOG_FILE_PREFIX: &str = "nextop.log";
pub const LOG_FILTER_ENV: &str = "NEXTOP_LOG";

const CRATE_TARGETS: [&str; 4] = ["nextop", "nextop_core", "nextop_adapters", "nextop_tui"];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log directory is unavailable: {0}")]
    DirectoryUnavailable(#[from] ConfigError),
    #[error("failed to create log directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid NEXTOP_LOG filter: {0}")]
    Filter(String),
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Flushes buffered log lines when dropped; hold it for the process lifetime.
#[derive(Debug)]
pub struct LogGuard {
    _file_guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LogGuard {
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard, LoggingError> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };
    std::fs::create_dir_all(&log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.clone(),
        source,
    })?;

    let env_filter = filter_from(std::env::var(LOG_FILTER_ENV).ok().as_deref(), verbose)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");
    Ok(LogGuard {
        _file_guard: file_guard,
        log_dir,
    })
}

fn filter_from(directives: Option<&str>, verbose: bool) -> Result<EnvFilter, LoggingError> {
    if let Some(directives) = directives.map(str::trim).filter(|raw| !raw.is_empty()) {
        return EnvFilter::try_new(directives).map_err(|error| LoggingError::Filter(error.to_string()));
    }

    let level = if verbose { "debug" } else { "info" };
    let default = CRATE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(format!("warn,{default}"))
        .map_err(|error| LoggingError::Filter(error.to_string()))
}

/// Test-writer subscriber; safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

pub fn default_log_dir() -> Result<PathBuf, LoggingError> {
    Ok(default_config_dir()?.join("logs"))
}
