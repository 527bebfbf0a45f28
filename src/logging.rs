use std::path::Path;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "basic_cleaning=info";
const LOG_FILE_PREFIX: &str = "basic_cleaning.log";

/// Initializes the logging system with both console and file output.
///
/// The returned guard flushes the file writer when dropped, so callers keep it
/// alive for the whole process. When `log_dir` cannot be created or opened the
/// file layer is skipped, a warning is logged to the console and `None` is
/// returned.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // Creates the directory itself and reports failure instead of panicking
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(log_dir);

    // A second init (e.g. in tests) is ignored
    match appender {
        Ok(appender) => {
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(appender);
            // JSON for the file, human-readable for the console
            let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
                .try_init();
            Some(guard)
        }
        Err(e) => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
                .try_init();
            warn!(
                "File logging disabled, {} is not usable: {}",
                log_dir.display(),
                e
            );
            None
        }
    }
}
