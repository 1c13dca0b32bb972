//! Subscriber setup shared by every crossload component.

use crate::config::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a file subscriber for `component`, plus stderr output when asked.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_logging(component: &str, settings: &LogSettings, to_stderr: bool) -> WorkerGuard {
    let log_dir = settings.log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!("cannot create log directory {}: {err}", log_dir.display());
    }

    // One file per day, e.g. cli.log.2024-01-21
    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{component}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(file_layer);

    // try_init: a host that already installed a subscriber keeps it
    if to_stderr {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);
        let _ = registry.with(stderr_layer).try_init();
    } else {
        let _ = registry.try_init();
    }

    guard
}

// RUST_LOG wins over the configured level.
fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
