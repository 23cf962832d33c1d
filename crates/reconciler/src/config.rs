//! Controller tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Configuration for the reconciliation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Capacity of the engine input queue. A full queue blocks the watch
    /// session.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// First backoff ceiling.
    #[serde(
        rename = "backoff_base_ms",
        with = "duration_millis",
        default = "default_backoff_base"
    )]
    pub backoff_base: Duration,

    /// Maximum backoff.
    #[serde(
        rename = "backoff_cap_ms",
        with = "duration_millis",
        default = "default_backoff_cap"
    )]
    pub backoff_cap: Duration,

    /// Consecutive undecodable frames tolerated before a forced resync.
    #[serde(default = "default_decode_error_threshold")]
    pub decode_error_threshold: u32,

    /// Consecutive speaker failures after which a route is reported degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Window for the first resync and speaker health check.
    #[serde(
        rename = "startup_timeout_secs",
        with = "duration_secs",
        default = "default_startup_timeout"
    )]
    pub startup_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            decode_error_threshold: default_decode_error_threshold(),
            degraded_after: default_degraded_after(),
            startup_timeout: default_startup_timeout(),
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    #[must_use]
    pub const fn with_decode_error_threshold(mut self, threshold: u32) -> Self {
        self.decode_error_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_degraded_after(mut self, failures: u32) -> Self {
        self.degraded_after = failures;
        self
    }

    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Backoff policy shared by the session and the engine.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.backoff_base, self.backoff_cap)
    }

    /// Reject settings the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for a zero queue capacity, zero
    /// thresholds, a zero startup window or a backoff base above its cap.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity must be greater than 0"));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(Error::invalid_config(format!(
                "backoff base {:?} exceeds cap {:?}",
                self.backoff_base, self.backoff_cap
            )));
        }
        if self.backoff_cap.is_zero() {
            return Err(Error::invalid_config("backoff cap must be greater than 0"));
        }
        if self.decode_error_threshold == 0 {
            return Err(Error::invalid_config(
                "decode_error_threshold must be greater than 0",
            ));
        }
        if self.degraded_after == 0 {
            return Err(Error::invalid_config("degraded_after must be greater than 0"));
        }
        if self.startup_timeout.is_zero() {
            return Err(Error::invalid_config("startup timeout must be greater than 0"));
        }
        Ok(())
    }
}

const fn default_queue_capacity() -> usize {
    256
}

const fn default_backoff_base() -> Duration {
    Duration::from_millis(250)
}

const fn default_backoff_cap() -> Duration {
    Duration::from_secs(30)
}

const fn default_decode_error_threshold() -> u32 {
    5
}

const fn default_degraded_after() -> u32 {
    8
}

const fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
