//! Logging infrastructure: structured tracing initialized once at startup.

use anyhow::Result;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard; dropping it flushes buffered logs.
/// Kept alive for the lifetime of `main`.
pub struct LoggerGuard {
    _guard: WorkerGuard,
}

/// Initialize the global tracing subscriber.
///
/// The `OMOIOS_LOG` environment variable (falling back to `level`) controls
/// verbosity via `tracing_subscriber::EnvFilter`; output is JSON-formatted
/// to stdout.
///
/// # Errors
/// Returns an error if `level` is not a recognized tracing level.
pub fn init(level: &str) -> Result<LoggerGuard> {
    let default_level = parse_log_level(level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("OMOIOS_LOG")
        .from_env_lossy();

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(level, "logger initialized");

    Ok(LoggerGuard { _guard: guard })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("invalid log level: {level}"),
    }
}
