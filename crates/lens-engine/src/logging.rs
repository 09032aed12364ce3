//! Structured logging for the query engine
//!
//! Console output in pretty, JSON or compact form, optional daily-rotated log
//! files, and per-request spans carrying the request id. Everything is driven
//! by the `logging` section of [`Config`](crate::config::Config), which already
//! folds in `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT` and `LOG_DIR`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

const LOG_FILE: &str = "lens.log";

// Chatty transport crates under the OpenAI client
const QUIET: [&str; 3] = ["hyper=warn", "reqwest=warn", "h2=warn"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Cannot create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Stdout | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(format!("unknown log output '{}'", other)),
        }
    }
}

/// Filter from the configured level plus the transport-crate directives
pub fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let mut filter = EnvFilter::try_new(level)?;
    for directive in QUIET {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

fn file_layer(format: LogFormat, directory: &str) -> Result<BoxedLayer, LoggingError> {
    std::fs::create_dir_all(directory)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, directory, LOG_FILE);
    Ok(match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(appender)
            .boxed(),
        _ => fmt::layer().with_writer(appender).with_ansi(false).boxed(),
    })
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    if config.output.console() {
        layers.push(console_layer(config.format));
    }
    if config.output.file() {
        layers.push(file_layer(config.format, &config.directory)?);
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;

    tracing::info!(format = ?config.format, output = ?config.output, level = %config.level, "Logging initialized");
    Ok(())
}

/// Emit a named event; every field is recorded with its `Debug` form
///
/// ```ignore
/// log_event!(INFO, "query_answered", attempts = 1, rows = 12);
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:ident, $event:literal $(, $key:ident = $value:expr)* $(,)?) => {
        ::tracing::event!(::tracing::Level::$level, event = $event $(, $key = ?$value)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_and_output() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());

        assert_eq!("both".parse::<LogOutput>(), Ok(LogOutput::Both));
        assert!(LogOutput::Both.console() && LogOutput::Both.file());
        assert!(!LogOutput::File.console());
    }

    #[test]
    fn test_filter_accepts_module_levels() {
        assert!(filter("info,lens_engine=debug").is_ok());
        assert!(filter("lens_engine=loud").is_err());
    }
}
