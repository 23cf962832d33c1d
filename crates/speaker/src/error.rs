//! Error types for speaker adapters.

use thiserror::Error;

/// Result type for speaker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a BGP speaker adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The speaker rejected or failed the call.
    #[error("speaker command '{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The speaker CLI could not be started.
    #[error("failed to spawn speaker CLI: {reason}")]
    SpawnFailed { reason: String },

    /// The call did not finish in time; the outcome is unknown.
    #[error("speaker call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The speaker endpoint is malformed.
    #[error("invalid speaker endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The speaker is unreachable.
    #[error("speaker unavailable: {reason}")]
    Unavailable { reason: String },

    /// The TLS settings cannot be used together.
    #[error("invalid speaker TLS settings: {reason}")]
    InvalidTls { reason: String },
}

impl Error {
    pub fn command_failed(
        command: impl Into<String>,
        status: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status: status.into(),
            stderr: stderr.into(),
        }
    }

    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid_tls(reason: impl Into<String>) -> Self {
        Self::InvalidTls {
            reason: reason.into(),
        }
    }

    /// Only bad settings are permanent; every call failure is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidEndpoint { .. } | Self::InvalidTls { .. })
    }
}
