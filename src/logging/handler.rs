use super::{parse_level, LoggingError};
use serde::{Deserialize, Serialize};
use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Stdout,
    Stderr,
    File,
}

/// A destination for log lines, as written in the config file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub kind: HandlerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Minimum level for this handler only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl HandlerConfig {
    pub fn stdout() -> Self {
        Self {
            kind: HandlerKind::Stdout,
            path: None,
            level: None,
        }
    }
}

/// Validated handler: the sink plus its own level threshold, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub sink: Sink,
    pub level: Option<LevelFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl Handler {
    pub fn from_config(config: &HandlerConfig) -> Result<Self, LoggingError> {
        let sink = match config.kind {
            HandlerKind::Stdout => Sink::Stdout,
            HandlerKind::Stderr => Sink::Stderr,
            HandlerKind::File => match &config.path {
                Some(path) => Sink::File(path.clone()),
                None => return Err(LoggingError::MissingPath),
            },
        };
        let level = config.level.as_deref().map(parse_level).transpose()?;

        Ok(Self { sink, level })
    }

    /// Opens the sink. File sinks are created if missing and appended to.
    pub fn open(&self) -> Result<BoxMakeWriter, LoggingError> {
        let writer = match &self.sink {
            Sink::Stdout => BoxMakeWriter::new(std::io::stdout),
            Sink::Stderr => BoxMakeWriter::new(std::io::stderr),
            Sink::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LoggingError::OpenHandler {
                        path: path.clone(),
                        source,
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        };

        Ok(writer)
    }
}
