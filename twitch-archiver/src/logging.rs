//! Logging setup.
//!
//! Console output always; a daily-rolling log file when `log_dir` is configured.
//! `RUST_LOG` takes precedence over the configured `log_level`.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Crates whose targets a bare level name applies to.
const LOG_TARGETS: &[&str] = &["twitch_archiver", "stream_source"];

/// Log file name prefix inside `log_dir`.
const LOG_FILE_PREFIX: &str = "twitch-archiver.log";

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Turn the configured `log_level` into a filter directive.
///
/// Level names (including `WARNING` and `CRITICAL`) are scoped to this
/// workspace's crates; anything else is used verbatim as an `EnvFilter`
/// directive.
pub fn filter_directive(log_level: &str) -> String {
    let level = match log_level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => return log_level.trim().to_string(),
    };

    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process.
pub fn init_logging(log_level: &str, log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(log_level)))
        .map_err(|e| crate::Error::Other(format!("Invalid log filter '{log_level}': {e}")))?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {e}"))
        })?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names_are_scoped() {
        assert_eq!(
            filter_directive("INFO"),
            "twitch_archiver=info,stream_source=info"
        );
        assert_eq!(
            filter_directive("Warning"),
            "twitch_archiver=warn,stream_source=warn"
        );
        assert_eq!(
            filter_directive("CRITICAL"),
            "twitch_archiver=error,stream_source=error"
        );
    }

    #[test]
    fn test_directives_pass_through() {
        assert_eq!(
            filter_directive("twitch_archiver::recorder=trace"),
            "twitch_archiver::recorder=trace"
        );
    }

    #[test]
    fn test_directive_is_valid_filter() {
        assert!(EnvFilter::try_new(filter_directive("debug")).is_ok());
    }
}
