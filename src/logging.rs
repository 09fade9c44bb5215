//! Structured logging configuration
//!
//! Provides:
//! - JSON output for machine consumption
//! - Pretty formatting for development
//! - Console, daily-rolling file, or both
//! - `RUST_LOG` taking precedence over the configured level

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "usage-tracker.log";

/// Initialize the logging system.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process when file output is enabled. Calling this more than
/// once is harmless, later calls leave the first subscriber in place.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    match config.output.as_str() {
        "file" => Some(init_file_logging(env_filter, &config.format, log_dir)),
        "both" => Some(init_combined_logging(env_filter, &config.format, log_dir)),
        _ => {
            init_console_logging(env_filter, &config.format);
            None
        }
    }
}

fn init_console_logging(filter: EnvFilter, format: &str) {
    let subscriber = tracing_subscriber::registry().with(filter);

    let _ = match format {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        _ => subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };
}

fn init_file_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    let _ = match format {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init(),
    };

    guard
}

fn init_combined_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    let _ = match format {
        "json" => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .try_init(),
    };

    guard
}
