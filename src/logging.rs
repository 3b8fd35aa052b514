//! Tracing setup for the `iota` binary.
//!
//! Console output goes to stderr and is filtered by `RUST_LOG` (default `info`). When a log
//! directory is configured, a second layer appends plain-text `info` and above to a file
//! that rolls over at midnight UTC, `iota_bot.YYYY-MM-DD.log`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::error::{BotError, Result};

static TRACING: OnceCell<()> = OnceCell::new();

const FILE_PREFIX: &str = "iota_bot";
const FILE_SUFFIX: &str = "log";

/// The file a given day's records land in.
pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}.{}.{FILE_SUFFIX}", date.format("%Y-%m-%d")))
}

fn daily_appender(dir: &Path) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix(FILE_SUFFIX)
        .build(dir)
        .map_err(|e| {
            BotError::configuration(format!("cannot log to {}: {e}", dir.display()))
        })
}

/// Install the global subscriber. Later calls are no-ops.
///
/// # Errors
/// The log directory or file cannot be created.
pub fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    if TRACING.get().is_some() {
        return Ok(());
    }

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file = match log_dir {
        Some(dir) => Some(
            fmt::layer()
                .with_writer(daily_appender(dir)?)
                .with_ansi(false)
                .with_filter(LevelFilter::INFO),
        ),
        None => None,
    };

    // A subscriber installed elsewhere (tests, embedding apps) wins.
    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init();
    let _ = TRACING.set(());

    if let Some(dir) = log_dir {
        tracing::debug!("Logging to {}", dir.display());
    }
    Ok(())
}
