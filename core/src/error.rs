use std::time::Duration;

use thiserror::Error;
use url::ParseError;

/// Error types for the Patan crawl engine
#[derive(Error, Debug)]
pub enum Error {
    /// Error when parsing a URL
    #[error("URL parse error: {0}")]
    UrlParse(#[from] ParseError),

    /// Transient network failure while fetching a request
    #[error("fetch error for {url}: {message}")]
    Fetch {
        /// URL of the failed request
        url: String,
        /// Underlying failure description
        message: String,
    },

    /// A fetch exceeded its deadline
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        /// URL of the timed-out request
        url: String,
        /// The deadline that expired
        timeout: Duration,
    },

    /// Non-blocking enqueue against a full scheduler queue
    #[error("scheduler queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Error raised by a middleware hook
    #[error("middleware {name}: {message}")]
    Middleware {
        /// Name of the failing middleware
        name: String,
        /// Failure description
        message: String,
    },

    /// Error raised by an item pipeline
    #[error("pipeline {name}: {message}")]
    Pipeline {
        /// Name of the failing pipeline
        name: String,
        /// Failure description
        message: String,
    },

    /// Error while processing an item
    #[error("item error: {0}")]
    Item(String),

    /// Error while parsing a response body
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid or unresolvable configuration; fatal at bootstrap
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(String),
}

impl Error {
    /// Create a new fetch error
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a new middleware error
    pub fn middleware(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new pipeline error
    pub fn pipeline(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this failure is worth retrying with a fresh request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Timeout { .. })
    }
}

/// Result type for Patan operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error.to_string())
    }
}
