//! Tracing setup: human or JSON lines on stderr, plus an optional daily
//! rolling JSON file.
//!
//! `RUST_LOG` wins over the defaults chosen here.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

const LOG_FILE_PREFIX: &str = "sketchpad.log";

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "sketchpad=debug,tower_http=debug,info"
    } else {
        "sketchpad=info,warn"
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init(format: LogFormat, verbose: bool, dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let stderr_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(verbose)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Cannot create log directory {}: {}", dir.display(), e);
                (None, None)
            } else {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed();
                (Some(layer), Some(guard))
            }
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_verbosity() {
        assert!(default_filter(true).contains("sketchpad=debug"));
        assert!(default_filter(false).contains("sketchpad=info"));
    }

    #[test]
    fn test_init_with_file_dir_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let guard = init(LogFormat::Json, false, Some(&logs));
        assert!(guard.is_some());
        assert!(logs.is_dir());
    }

    #[test]
    fn test_init_without_dir_has_no_guard() {
        assert!(init(LogFormat::Pretty, false, None).is_none());
    }
}
