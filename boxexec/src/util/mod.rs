pub mod process;

use std::path::Path;

use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_NAME: &str = "boxexecd.log";

/// Build the env filter: `RUST_LOG` wins, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> BoxexecResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| BoxexecError::Config(format!("invalid log level {}: {}", default_level, e)))
}

/// Initialize process-wide logging.
///
/// Always logs to stderr. With `log_dir`, also writes a daily-rotated file
/// through a non-blocking writer; keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init_logging(default_level: &str, log_dir: Option<&Path>) -> BoxexecResult<Option<WorkerGuard>> {
    let env_filter = env_filter(default_level)?;

    let Some(log_dir) = log_dir else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    register_to_tracing(non_blocking, env_filter);
    Ok(Some(guard))
}

/// Register a subscriber that logs to both stderr and `non_blocking`.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
