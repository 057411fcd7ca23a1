//! Logging initialization using the `tracing` ecosystem.
//!
//! Provides:
//! - Console output, human-readable text or one JSON object per line
//! - File output (daily rotation via `tracing-appender`)
//! - Configurable level via env var `RUST_LOG` or explicit parameter

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start.
///
/// # Parameters
///
/// - `log_level`: default filter if `RUST_LOG` is not set (e.g. `"info"`)
/// - `format`: console format
/// - `log_dir`: optional directory for daily-rotating log files
/// - `file_prefix`: log file name prefix (e.g. `"tf-serve"`)
pub fn init_logging(log_level: &str, format: LogFormat, log_dir: Option<&str>, file_prefix: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).with_thread_names(true).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).with_thread_names(true).boxed(),
    };

    let file_layer = log_dir.map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, file_prefix);
        fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true).with_thread_names(true)
    });

    // `try_init` so tests and embedders that already installed a subscriber
    // don't panic here.
    let _ = tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).try_init();
}
