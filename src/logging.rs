use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LoggingConfig, Rotation};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stderr only, for short-lived commands.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Stderr plus a rotating file. Keep the guard alive until exit or buffered
/// lines are lost.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("Failed to create log directory: {}", config.directory.display())
    })?;
    let appender = RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(&config.file_name)
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1))
        .build(&config.directory)
        .with_context(|| "Failed to open log file")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(guard)
}

fn rotation(r: Rotation) -> rolling::Rotation {
    match r {
        Rotation::Minutely => rolling::Rotation::MINUTELY,
        Rotation::Hourly => rolling::Rotation::HOURLY,
        Rotation::Daily => rolling::Rotation::DAILY,
        Rotation::Never => rolling::Rotation::NEVER,
    }
}
