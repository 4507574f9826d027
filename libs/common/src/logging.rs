//! Logging bootstrap for VoltageEMS services
//!
//! Console output always goes through a `tracing-subscriber` fmt layer; a
//! daily rolling file is added when a log directory is configured. `RUST_LOG`
//! overrides the configured level when present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{Error, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (`info`, `debug`, `info,iecsrv=debug`, ...)
    pub level: String,
    pub format: LogFormat,
    /// ANSI colors on the console
    pub ansi: bool,
    /// Directory for daily rolling log files; console only when unset
    pub dir: Option<PathBuf>,
    /// File name prefix, usually the service name
    pub file_prefix: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `timestamp [LEVEL] target: message`
    #[default]
    Bracketed,
    Compact,
    Pretty,
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Bracketed,
            ansi: true,
            dir: None,
            file_prefix: "service".to_string(),
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2026-01-02T00:50:44.809123Z [INFO] iecsrv::server: message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let metadata = event.metadata();
        let level = *metadata.level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }
        write!(writer, "{}: ", metadata.target())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&directive)
        .map_err(|e| Error::logging(format!("Invalid log level '{}': {}", directive, e)))
}

fn console_layer(config: &LogConfig) -> Result<BoxedLayer> {
    let filter = build_filter(&config.level)?;
    let layer = match config.format {
        LogFormat::Bracketed => fmt::layer()
            .with_ansi(config.ansi)
            .event_format(BracketedLevelFormat)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(config.ansi)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

fn file_layer(config: &LogConfig, dir: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let filter = build_filter(&config.level)?;

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        _ => fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .with_filter(filter)
            .boxed(),
    };
    Ok((layer, guard))
}

/// Install the global subscriber
///
/// Returns the file writer guard when file logging is enabled; it must be
/// kept alive for buffered lines to be flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)?];
    let mut guard = None;

    if let Some(dir) = &config.dir {
        let (layer, file_guard) = file_layer(config, dir)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    match &config.dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.file_prefix, dir),
        None => tracing::debug!("Logging: console only"),
    }

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Bracketed);
        assert!(config.dir.is_none());
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("info,iecsrv=notalevel").is_err());
        assert!(build_filter("info,iecsrv=debug").is_ok());
    }

    #[test]
    fn test_log_format_deserializes_lowercase() {
        let config: LogConfig = from_json("{\"level\":\"debug\",\"format\":\"json\"}");
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.ansi);
    }

    fn from_json(input: &str) -> LogConfig {
        use figment::providers::{Format, Json};
        figment::Figment::new()
            .merge(Json::string(input))
            .extract()
            .unwrap()
    }
}
