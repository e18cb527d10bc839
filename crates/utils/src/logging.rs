//! provides logging helpers

use std::env;
use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// When set, logs go to a daily rolling file under this directory instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "DEVICE_AGENT_LOG_PATH";

const LOG_FILE_PREFIX: &str = "device-agent.log";

/// Builds the formatting layer, writing to a rolling file when `log_path` is given.
///
/// The returned guard must be kept alive for as long as file logging is needed.
pub fn get_fmt_layer<S>(
    log_path: Option<String>,
) -> (Box<dyn Layer<S> + Send + Sync>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = log_path.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(3)
            .build(Path::new(&dir))
            .map_err(|e| eprintln!("failed to create log file under {dir}: {e}, using stderr"))
            .ok()
    });

    match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (fmt_layer, Some(guard))
        }
        None => {
            let fmt_layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed();
            (fmt_layer, None)
        }
    }
}

/// initiate the global tracing subscriber
pub fn init() -> Option<WorkerGuard> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let (fmt_layer, guard) = get_fmt_layer(env::var(LOG_PATH_ENV_VAR).ok());

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::Registry;

    use super::*;

    #[test]
    fn test_stderr_layer_has_no_guard() {
        let (_layer, guard) = get_fmt_layer::<Registry>(None);
        assert!(guard.is_none());
    }

    #[test]
    fn test_file_layer_writes_under_log_path() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (_layer, guard) =
            get_fmt_layer::<Registry>(Some(dir.path().to_string_lossy().into_owned()));
        assert!(guard.is_some(), "file logging should hand back a guard");
    }
}
