//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable consulted for the log file path when no flag is given.
pub const LOG_PATH_ENV_VAR: &str = "SLURM_GPU_EXPORTER_LOG_PATH";

const MAX_LOG_FILES: usize = 3;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Log path `{0}` has no file name")]
    InvalidLogPath(PathBuf),

    #[error("Failed to create rolling file appender: {0}")]
    Appender(#[from] InitError),
}

/// initiate the global tracing subscriber
///
/// Events go to stderr unless `log_path` is set, in which case they are written to a daily
/// rolling file next to it. The returned guard must be held for the lifetime of the process,
/// dropping it flushes and stops the background writer.
pub fn init(log_path: Option<&Path>) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let Some(log_path) = log_path else {
        let fmt_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter);
        registry().with(fmt_layer).init();
        return Ok(None);
    };

    let (directory, file_name) = split_log_path(log_path)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(MAX_LOG_FILES)
        .build(directory)?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let fmt_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter);
    registry().with(fmt_layer).init();

    Ok(Some(file_guard))
}

/// Splits a log file path into the directory the appender writes to and its file prefix.
fn split_log_path(log_path: &Path) -> Result<(PathBuf, String), LoggingError> {
    let file_name = log_path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidLogPath(log_path.to_path_buf()))?
        .to_string_lossy()
        .into_owned();

    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((directory, file_name))
}
