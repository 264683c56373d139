//! Error types for each boundary of the crawler.
//!
//! Recoverable conditions (a 404 detail page, a missing optional element, a
//! malformed note) never become errors: they degrade to "no item" inside the
//! strategy. The enums below cover what is left once that rule is applied.

use thiserror::Error;

/// Failure while loading the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A task descriptor could not be resolved into a scraper configuration.
///
/// The orchestrator treats every variant as "skip this task".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskBuildError {
    #[error("unknown source type '{0}'")]
    UnknownSourceType(String),
    #[error("task is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("no source definition for source_type='{source_type}' and conference='{conference}'")]
    MissingDefinition {
        source_type: String,
        conference: String,
    },
    #[error("no URL pattern for {conference} in year {year}")]
    MissingYearPattern { conference: String, year: u32 },
}

/// Transport-level failure of a single HTTP attempt. Always considered transient.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Unrecoverable strategy failure. Fails the task, never the run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("task configuration lacks '{0}'")]
    MissingConfig(&'static str),
    #[error("browser session could not be started: {0}")]
    BrowserLaunch(String),
    #[error("webdriver command failed: {0}")]
    WebDriver(String),
}

/// Why a single task produced nothing. Logged by the runner, never propagated.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error("sink '{sink}' rejected the batch: {source}")]
    Sink {
        sink: &'static str,
        #[source]
        source: SinkError,
    },
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// A post-processing sink failed to accept a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report formatting failed")]
    Format(#[from] std::fmt::Error),
}
