//! Error types for the store client.

use corebgp_core::AnnouncementKey;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the announcement store.
#[derive(Error, Debug)]
pub enum Error {
    /// The announcement does not exist.
    #[error("announcement {key} not found")]
    NotFound { key: AnnouncementKey },

    /// The announcement already exists.
    #[error("announcement {key} already exists")]
    Conflict { key: AnnouncementKey },

    /// Failed to connect to the store.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Request timed out.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The store answered with a status we do not handle.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// A response or watch frame could not be decoded.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// The watch stream broke.
    #[error("watch stream closed: {reason}")]
    StreamClosed { reason: String },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    pub const fn not_found(key: AnnouncementKey) -> Self {
        Self::NotFound { key }
    }

    pub const fn conflict(key: AnnouncementKey) -> Self {
        Self::Conflict { key }
    }

    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn unexpected_status(status: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create a stream closed error.
    pub fn stream_closed(reason: impl Into<String>) -> Self {
        Self::StreamClosed {
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Check if this error is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::Timeout { .. }
            | Self::StreamClosed { .. }
            | Self::Http(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Malformed payload rather than a broken transport.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// The record is already gone; callers reconciling state treat this as done.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
