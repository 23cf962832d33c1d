//! Configuration for the GoBGP adapter.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for `GobgpCli`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerConfig {
    /// GoBGP gRPC endpoint (`host:port`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Path to the `gobgp` CLI executable.
    #[serde(default = "default_cli_path")]
    pub cli_path: String,

    /// CA certificate for a TLS-enabled gRPC endpoint.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate presented to the endpoint. Needs `client_key`.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,

    #[serde(default)]
    pub client_key: Option<PathBuf>,

    /// Timeout for a single announce/withdraw call.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            cli_path: default_cli_path(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            timeout: default_timeout(),
        }
    }
}

impl SpeakerConfig {
    /// Create a config for the given endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the CLI path.
    #[must_use]
    pub fn cli_path(mut self, path: impl Into<String>) -> Self {
        self.cli_path = path.into();
        self
    }

    /// Set the CA certificate.
    #[must_use]
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Set the client certificate and key.
    #[must_use]
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that the TLS files form a usable set.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTls` if only one of the client certificate and
    /// key is set, or if they are set without a CA certificate.
    pub fn check_tls(&self) -> Result<()> {
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err(Error::invalid_tls("client certificate given without a key")),
            (None, Some(_)) => Err(Error::invalid_tls("client key given without a certificate")),
            (Some(_), Some(_)) if self.ca_cert.is_none() => Err(Error::invalid_tls(
                "client certificate needs a CA certificate",
            )),
            _ => Ok(()),
        }
    }

    /// Split the endpoint into host and port.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEndpoint` if there is no `:port` suffix or the
    /// port is not a number.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let (host, port) = self
            .endpoint
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_endpoint(&self.endpoint, "expected host:port"))?;
        let port = port
            .parse()
            .map_err(|e| Error::invalid_endpoint(&self.endpoint, format!("bad port: {e}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::invalid_endpoint(&self.endpoint, "empty host"));
        }
        Ok((host.to_string(), port))
    }
}

fn default_endpoint() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_cli_path() -> String {
    "gobgp".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
