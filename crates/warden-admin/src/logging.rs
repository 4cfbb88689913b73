//! Logging setup for warden-admin
//!
//! Console output goes to stderr so command results on stdout stay
//! machine-readable. With a log directory, events are also written to a
//! daily-rolling `warden-admin.log`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_NAME: &str = "warden-admin.log";

/// Keeps the non-blocking file writer flushing until dropped
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

pub fn init_logging(level: &str, log_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(EnvFilter::try_new(level)?);
    layers.push(Box::new(console_layer));

    let mut guard = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(EnvFilter::try_new(level)?);
        layers.push(Box::new(file_layer));
    }

    Registry::default().with(layers).try_init()?;

    Ok(LoggingGuard { _guard: guard })
}
