use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "crewflow.log";

/// HTTP plumbing is only interesting when something breaks.
const QUIET_DEPENDENCIES: [&str; 3] = ["hyper=warn", "reqwest=warn", "rustls=warn"];

/// Builds the filter from `RUST_LOG` when set, else from `log_level`.
fn build_filter(log_level: &str) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
            EnvFilter::new("info")
        });
    QUIET_DEPENDENCIES
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(base, |filter, directive| filter.add_directive(directive))
}

/// Initialize the logging system with the specified log level.
///
/// # Arguments
///
/// * `log_level` - Level or filter directive (e.g. "info", "crewflow=debug"); `RUST_LOG` wins
/// * `with_file` - Whether to also log to a daily rotating `logs/crewflow.log`
///
/// # Returns
///
/// * `Option<WorkerGuard>` - Keeps the file writer flushing; hold it until exit
pub fn init_logging(log_level: &str, with_file: bool) -> Option<WorkerGuard> {
    let console = fmt::layer()
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = if with_file {
        let appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_line_number(true)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(console)
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Logging already initialized: {}", e);
    }
    guard
}

