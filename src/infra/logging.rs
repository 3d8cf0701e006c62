//! Usage: tracing subscriber setup (stderr + optional daily log file, `log` crate bridge).

use crate::infra::settings::SessionSettings;
use crate::shared::error::{AppError, AppResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "taskcraft-session.log";

/// Keeps the file writer flushing; drop it on shutdown.
#[must_use = "dropping the guard stops the file writer"]
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &SessionSettings) -> AppResult<LoggingGuard> {
    let filter = build_filter(&settings.log_filter);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter);

    let (file_layer, file_guard) = match settings.log_dir.as_deref() {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::config(format!("failed to create log dir {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(build_filter(&settings.log_filter));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::config(format!("failed to install tracing subscriber: {e}")))?;

    // r2d2 logs through the `log` facade.
    if let Err(err) = tracing_log::LogTracer::init() {
        tracing::warn!("`log` records will not reach tracing: {}", err);
    }

    tracing::debug!(
        log_filter = %settings.log_filter,
        file_logging = settings.log_dir.is_some(),
        "logging initialized"
    );

    Ok(LoggingGuard { _file: file_guard })
}

fn build_filter(raw: &str) -> EnvFilter {
    EnvFilter::try_new(raw).unwrap_or_else(|err| {
        eprintln!("invalid log filter {raw:?} ({err}); falling back to info");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_filter_accepts_directives() {
        let filter = build_filter("taskcraft_session=debug,reqwest=warn");
        assert!(filter.to_string().contains("taskcraft_session=debug"));
    }

    #[test]
    fn build_filter_falls_back_on_garbage() {
        let filter = build_filter("taskcraft_session=loud");
        assert_eq!(filter.to_string(), "info");
    }
}
