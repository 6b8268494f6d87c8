use anyhow::Context;
use fsward_core::settings::LoggingSettings;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Sends tracing output to a daily rotated file in the configured log
/// directory. stdout carries responses only, so nothing is logged there.
/// Keep the returned guard alive to flush buffered lines on exit.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<WorkerGuard> {
    let log_dir = settings.resolved_log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("fsward")
        .filename_suffix("log")
        .max_log_files(settings.retention_days.max(1) as usize)
        .build(&log_dir)
        .context("Failed to create rolling log file")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(log_dir = %log_dir.display(), "Tracing initialized");
    Ok(guard)
}
