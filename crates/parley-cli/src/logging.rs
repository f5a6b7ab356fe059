use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE: &str = "parley.log";

/// Install stderr and daily-rolling file logging.
///
/// `RUST_LOG` wins over the defaults. Keep the returned guard alive for the
/// whole run or buffered file lines are lost.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    let default = if verbose {
        "info,parley_core=debug,parley_storage=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true),
        )
        .try_init()?;

    Ok(guard)
}
