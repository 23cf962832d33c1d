//! Updater configuration.
//!
//! Layered as defaults, then an optional TOML or JSON file, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use corebgp_client::ClientConfig;
use corebgp_reconciler::ControllerConfig;
use corebgp_speaker::SpeakerConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Cli;

/// Everything the `updater` binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// CoreBGP API server URL.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// GoBGP gRPC endpoint (`host:port`).
    #[serde(default = "default_gobgp_endpoint")]
    pub gobgp_endpoint: String,

    #[serde(default = "default_gobgp_cli_path")]
    pub gobgp_cli_path: String,

    #[serde(default)]
    pub gobgp_ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS with GoBGP. Needs the key too.
    #[serde(default)]
    pub gobgp_client_cert: Option<PathBuf>,

    #[serde(default)]
    pub gobgp_client_key: Option<PathBuf>,

    /// Log file, appended to. `-` logs to stderr.
    #[serde(default = "default_log_path")]
    pub log_path: String,

    #[serde(default)]
    pub verbose: u8,

    /// Per-request timeout for both the API and the gobgp CLI.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub controller: ControllerConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            gobgp_endpoint: default_gobgp_endpoint(),
            gobgp_cli_path: default_gobgp_cli_path(),
            gobgp_ca_cert: None,
            gobgp_client_cert: None,
            gobgp_client_key: None,
            log_path: default_log_path(),
            verbose: 0,
            request_timeout_secs: default_request_timeout_secs(),
            controller: ControllerConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Build the effective configuration from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged result does not validate.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. `.json` files are parsed as JSON, anything else
    /// as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))
        } else {
            toml::from_str(&raw).with_context(|| format!("Invalid TOML in {}", path.display()))
        }
    }

    /// Let flags that were given win over the file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(endpoint) = &cli.api_endpoint {
            self.api_endpoint.clone_from(endpoint);
        }
        if let Some(endpoint) = &cli.gobgp_endpoint {
            self.gobgp_endpoint.clone_from(endpoint);
        }
        if let Some(path) = &cli.gobgp_cli {
            self.gobgp_cli_path.clone_from(path);
        }
        if let Some(path) = &cli.gobgp_ca_cert {
            self.gobgp_ca_cert = Some(path.clone());
        }
        if let Some(path) = &cli.gobgp_client_cert {
            self.gobgp_client_cert = Some(path.clone());
        }
        if let Some(path) = &cli.gobgp_client_key {
            self.gobgp_client_key = Some(path.clone());
        }
        if let Some(path) = &cli.log_path {
            self.log_path.clone_from(path);
        }
        if cli.verbose > 0 {
            self.verbose = cli.verbose;
        }
    }

    /// Check the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_endpoint)
            .with_context(|| format!("Invalid api_endpoint {:?}", self.api_endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("api_endpoint must be http or https, got {}", url.scheme());
        }

        let speaker = self.speaker_config();
        speaker
            .host_port()
            .with_context(|| format!("Invalid gobgp_endpoint {:?}", self.gobgp_endpoint))?;
        speaker.check_tls().context("Invalid GoBGP TLS settings")?;

        if self.gobgp_cli_path.trim().is_empty() {
            bail!("gobgp_cli_path must not be empty");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }

        self.controller.validate().context("Invalid controller settings")?;
        Ok(())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::with_base_url(self.api_endpoint.clone()).timeout(self.request_timeout())
    }

    #[must_use]
    pub fn speaker_config(&self) -> SpeakerConfig {
        SpeakerConfig {
            ca_cert: self.gobgp_ca_cert.clone(),
            client_cert: self.gobgp_client_cert.clone(),
            client_key: self.gobgp_client_key.clone(),
            ..SpeakerConfig::with_endpoint(self.gobgp_endpoint.clone())
                .cli_path(self.gobgp_cli_path.clone())
                .timeout(self.request_timeout())
        }
    }
}

fn default_api_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_gobgp_endpoint() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_gobgp_cli_path() -> String {
    "gobgp".to_string()
}

fn default_log_path() -> String {
    "/var/log/corebgp/updater.log".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}
