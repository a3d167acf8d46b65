//! Process-wide logging bootstrap.
//!
//! A [`LoggingContext`] is built once in `main` from the `[logging]` config
//! section, installed as the global subscriber and then handed by reference to
//! the components that need to know how the process logs.

mod format;
mod handler;

pub use format::PatternFormat;
pub use handler::{Handler, HandlerConfig, HandlerKind, Sink};

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::{
    filter::{filter_fn, Directive, EnvFilter, LevelFilter},
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

pub const DEFAULT_FORMAT: &str = "{timestamp} - {name} - {level} - {message}";
pub const JSON_FORMAT: &str = "json";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),
    #[error("invalid log format {template:?}: {reason}")]
    InvalidFormat { template: String, reason: String },
    #[error("invalid logger name {0:?}")]
    InvalidLogger(String),
    #[error("file handler requires a path")]
    MissingPath,
    #[error("failed to open log file {}", path.display())]
    OpenHandler {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("logging has already been initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Either `json` or a `{timestamp}`/`{name}`/`{level}`/`{message}` template.
    pub format: String,
    pub handlers: Vec<HandlerConfig>,
    /// Per-logger level overrides, keyed by logger name.
    pub loggers: BTreeMap<String, String>,
    /// Honor `RUST_LOG` on top of `level` and `loggers`.
    pub use_rust_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: DEFAULT_FORMAT.to_string(),
            handlers: vec![HandlerConfig::stdout()],
            loggers: BTreeMap::new(),
            use_rust_log: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pattern(PatternFormat),
    Json,
}

impl LogFormat {
    pub fn parse(format: &str) -> Result<Self, LoggingError> {
        if format.eq_ignore_ascii_case(JSON_FORMAT) {
            Ok(Self::Json)
        } else {
            PatternFormat::parse(format).map(Self::Pattern)
        }
    }
}

/// Accepts tracing's level names and `off`, plus `warning`, `critical` and
/// `fatal`.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    let invalid = || LoggingError::InvalidLevel(level.to_string());
    match level.trim().to_ascii_lowercase().as_str() {
        "" => Err(invalid()),
        "warning" => Ok(LevelFilter::WARN),
        "critical" | "fatal" => Ok(LevelFilter::ERROR),
        other => LevelFilter::from_str(other).map_err(|_| invalid()),
    }
}

/// Logger names are `::`-separated paths, the same shape as tracing targets.
fn is_valid_logger_name(name: &str) -> bool {
    name.split("::").all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    }) && format!("{name}=trace").parse::<Directive>().is_ok()
}

/// True when `target` is `logger` itself or sits below it in the `::` path.
fn is_within(target: &str, logger: &str) -> bool {
    target
        .strip_prefix(logger)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Level thresholds by logger name. An override covers the logger it names
/// and everything below it; the longest matching override wins.
#[derive(Debug, Clone, PartialEq)]
struct LoggerLevels {
    root: LevelFilter,
    overrides: Vec<(String, LevelFilter)>,
}

impl LoggerLevels {
    fn set(&mut self, name: &str, level: LevelFilter) {
        match self.overrides.iter_mut().find(|(logger, _)| logger == name) {
            Some((_, existing)) => *existing = level,
            None => self.overrides.push((name.to_string(), level)),
        }
    }

    fn level_for(&self, target: &str) -> LevelFilter {
        self.overrides
            .iter()
            .filter(|(logger, _)| is_within(target, logger))
            .max_by_key(|(logger, _)| logger.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.root)
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        *metadata.level() <= self.level_for(metadata.target())
    }

    fn max_level(&self) -> LevelFilter {
        self.overrides
            .iter()
            .map(|(_, level)| *level)
            .fold(self.root, LevelFilter::max)
    }

    /// Layers `RUST_LOG` directives over the configured levels. Items that
    /// tracing-subscriber cannot parse, and span or field filters, are skipped.
    fn apply_directives(&mut self, directives: &str) {
        for item in directives.split(',').map(str::trim) {
            if item.is_empty() || item.contains(['[', '{']) || item.parse::<Directive>().is_err() {
                continue;
            }

            match item.split_once('=') {
                Some((target, level)) => {
                    if let (true, Ok(level)) = (is_valid_logger_name(target), parse_level(level)) {
                        self.set(target, level);
                    }
                }
                None => match parse_level(item) {
                    Ok(level) => self.root = level,
                    Err(_) if is_valid_logger_name(item) => self.set(item, LevelFilter::TRACE),
                    Err(_) => {}
                },
            }
        }
    }
}

/// Validated logging configuration for the whole process.
#[derive(Debug, Clone)]
pub struct LoggingContext {
    levels: LoggerLevels,
    format: LogFormat,
    handlers: Vec<Handler>,
}

impl LoggingContext {
    /// Validates `config`. When `use_rust_log` is set, `RUST_LOG` is read
    /// here, once, and layered over the configured levels.
    pub fn new(config: LoggingConfig) -> Result<Self, LoggingError> {
        let rust_log = if config.use_rust_log {
            std::env::var(EnvFilter::DEFAULT_ENV).ok()
        } else {
            None
        };
        Self::with_env(config, rust_log.as_deref())
    }

    fn with_env(config: LoggingConfig, rust_log: Option<&str>) -> Result<Self, LoggingError> {
        let format = LogFormat::parse(&config.format)?;

        let mut handlers = config
            .handlers
            .iter()
            .map(Handler::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        if handlers.is_empty() {
            handlers.push(Handler {
                sink: Sink::Stdout,
                level: None,
            });
        }

        let mut levels = LoggerLevels {
            root: parse_level(&config.level)?,
            overrides: Vec::with_capacity(config.loggers.len()),
        };
        for (name, level) in &config.loggers {
            if !is_valid_logger_name(name) {
                return Err(LoggingError::InvalidLogger(name.clone()));
            }
            levels.set(name, parse_level(level)?);
        }
        if let Some(directives) = rust_log {
            levels.apply_directives(directives);
        }

        Ok(Self {
            levels,
            format,
            handlers,
        })
    }

    pub fn level(&self) -> LevelFilter {
        self.levels.root
    }

    pub fn format(&self) -> &LogFormat {
        &self.format
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Minimum level a named logger inherits: the override naming it or its
    /// closest `::` ancestor, else the root level. This is the threshold the
    /// subscriber applies to events with that target.
    pub fn effective_level(&self, name: &str) -> LevelFilter {
        self.levels.level_for(name)
    }

    /// Builds a subscriber writing to the configured handlers without
    /// installing it, so it can be scoped with `tracing::subscriber::with_default`.
    pub fn subscriber(&self) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError> {
        self.subscriber_with(Handler::open)
    }

    /// Installs the subscriber as the process-wide default. Only the first
    /// installation in a process succeeds.
    pub fn install(&self) -> Result<(), LoggingError> {
        self.subscriber()?
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)
    }

    fn subscriber_with<F>(
        &self,
        mut open: F,
    ) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError>
    where
        F: FnMut(&Handler) -> Result<BoxMakeWriter, LoggingError>,
    {
        let levels = Arc::new(self.levels.clone());

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
            Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let writer = open(handler)?;
            let threshold = handler.level.unwrap_or(LevelFilter::TRACE);
            let levels = Arc::clone(&levels);
            let filter = filter_fn(move |metadata: &Metadata<'_>| {
                *metadata.level() <= threshold && levels.enabled(metadata)
            })
            .with_max_level_hint(threshold.min(self.levels.max_level()));

            layers.push(
                handler_layer::<Registry>(&self.format, writer)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        Ok(tracing_subscriber::registry().with(layers))
    }
}

fn handler_layer<S>(format: &LogFormat, writer: BoxMakeWriter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    match format {
        LogFormat::Pattern(pattern) => fmt::layer()
            .event_format(pattern.clone())
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}
