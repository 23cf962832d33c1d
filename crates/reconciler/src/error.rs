//! Error types for the reconciler crate.

use std::fmt;
use std::time::Duration;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Store and speaker failures are retried inside the controller and never
/// surface here; every variant ends the process.
#[derive(Debug, Clone)]
pub enum Error {
    /// The first resync did not finish inside the startup window.
    StartupTimeout { waited: Duration, last_error: Option<String> },
    /// The speaker never answered its health check inside the startup window.
    SpeakerUnreachable { waited: Duration, reason: String },
    /// A controller task ended abnormally.
    TaskFailed { task: String, reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartupTimeout { waited, last_error } => {
                write!(f, "initial resync did not complete within {waited:?}")?;
                if let Some(reason) = last_error {
                    write!(f, ": {reason}")?;
                }
                Ok(())
            }
            Self::SpeakerUnreachable { waited, reason } => {
                write!(f, "speaker unreachable after {waited:?}: {reason}")
            }
            Self::TaskFailed { task, reason } => {
                write!(f, "task '{task}' failed: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a startup timeout error.
    pub const fn startup_timeout(waited: Duration, last_error: Option<String>) -> Self {
        Self::StartupTimeout { waited, last_error }
    }

    /// Create a speaker unreachable error.
    pub fn speaker_unreachable(waited: Duration, reason: impl Into<String>) -> Self {
        Self::SpeakerUnreachable {
            waited,
            reason: reason.into(),
        }
    }

    /// Create a task failed error.
    pub fn task_failed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_timeout_display() {
        let err = Error::startup_timeout(Duration::from_secs(30), Some("connection refused".into()));
        let msg = err.to_string();
        assert!(msg.contains("30s"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_startup_timeout_without_cause() {
        let err = Error::startup_timeout(Duration::from_secs(5), None);
        assert_eq!(err.to_string(), "initial resync did not complete within 5s");
    }

    #[test]
    fn test_task_failed_names_task() {
        let err = Error::task_failed("engine", "panicked");
        assert_eq!(err.to_string(), "task 'engine' failed: panicked");
    }
}
