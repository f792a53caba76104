//! Error types for Webmark.
//!
//! Library crates use [`WebmarkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Webmark operations.
#[derive(Debug, thiserror::Error)]
pub enum WebmarkError {
    /// Timeout, DNS/connect failure, or a non-success HTTP status.
    #[error("network error: {message}")]
    Network { message: String },

    /// Malformed HTML, JSON or YAML.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// An API description failed schema or structural checks.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Extracted content is shorter than the configured minimum.
    #[error("content too short: {length} characters (minimum {minimum})")]
    ContentLength { length: usize, minimum: usize },

    /// The headless browser session could not be started.
    #[error("browser init error: {0}")]
    BrowserInit(String),

    /// All retry attempts failed; carries the last underlying cause.
    #[error("failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<WebmarkError>,
    },

    /// A rate limiter rejected a request it can never (or not soon enough) admit.
    #[error("rate limit error: {0}")]
    RateLimit(String),

    /// A limiter or session was used after it was shut down.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Outermost pipeline error naming the URL and the underlying cause.
    #[error("{url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: Box<WebmarkError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WebmarkError>;

impl WebmarkError {
    /// Create a network error from any displayable message.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the URL being processed. Already-attributed errors are left alone.
    pub fn at(self, url: impl Into<String>) -> Self {
        match self {
            Self::Fetch { .. } => self,
            other => Self::Fetch {
                url: url.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::BrowserInit(_) => true,
            Self::Fetch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Number of attempts made, when the error came out of a retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            Self::Fetch { source, .. } => source.attempts(),
            _ => None,
        }
    }
}
