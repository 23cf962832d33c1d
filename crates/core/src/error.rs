//! Core error types for CoreBGP model validation.
//!
//! All errors are explicit and typed - no panics allowed.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for parsing and validating model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid prefix '{input}': {reason}")]
    InvalidPrefix { input: String, reason: String },

    #[error("invalid community '{input}': {reason}")]
    InvalidCommunity { input: String, reason: String },

    #[error("invalid announcement {key}: {reason}")]
    InvalidAnnouncement { key: String, reason: String },
}

impl Error {
    /// Create an invalid prefix error.
    pub fn invalid_prefix(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid community error.
    pub fn invalid_community(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCommunity {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid announcement error.
    pub fn invalid_announcement(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAnnouncement {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_prefix("10.0.0.0/33", "length exceeds 32");
        assert!(err.to_string().contains("10.0.0.0/33"));
        assert!(err.to_string().contains("exceeds"));
    }
}
