//! GoBGP adapter driving the `gobgp` CLI.
//!
//! Each call runs one `gobgp global rib` command against the configured
//! gRPC endpoint. The command is killed if it outlives the call timeout.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use corebgp_core::{Prefix, Route, RouteKey};
use tokio::process::Command;
use tracing::debug;

use crate::config::SpeakerConfig;
use crate::error::{Error, Result};
use crate::speaker::Speaker;

/// Speaker backed by a GoBGP daemon.
#[derive(Debug, Clone)]
pub struct GobgpCli {
    config: Arc<SpeakerConfig>,
    /// Connection flags shared by every command.
    connection_args: Vec<String>,
}

impl GobgpCli {
    /// Create an adapter for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEndpoint` if the endpoint is not `host:port`,
    /// and `Error::InvalidTls` if the TLS files do not fit together.
    pub fn with_config(config: SpeakerConfig) -> Result<Self> {
        let (host, port) = config.host_port()?;
        config.check_tls()?;
        let mut connection_args = vec![
            "--host".to_string(),
            host,
            "--port".to_string(),
            port.to_string(),
        ];
        if let Some(ref ca) = config.ca_cert {
            connection_args.push("--tls".to_string());
            connection_args.push("--tls-ca-file".to_string());
            connection_args.push(ca.to_string_lossy().to_string());
        }
        if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
            connection_args.push("--tls-cert-file".to_string());
            connection_args.push(cert.to_string_lossy().to_string());
            connection_args.push("--tls-key-file".to_string());
            connection_args.push(key.to_string_lossy().to_string());
        }

        Ok(Self {
            config: Arc::new(config),
            connection_args,
        })
    }

    /// Arguments for `announce`, without the connection flags.
    #[must_use]
    pub fn announce_args(route: &Route) -> Vec<String> {
        let mut args = rib_args(route.prefix(), "add");
        args.push("nexthop".to_string());
        args.push(route.next_hop().to_string());

        if !route.attributes.communities.is_empty() {
            args.push("community".to_string());
            args.push(
                route
                    .attributes
                    .communities
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        if !route.attributes.as_path.is_empty() {
            args.push("aspath".to_string());
            args.push(
                route
                    .attributes
                    .as_path
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }

        args
    }

    /// Arguments for `withdraw`, without the connection flags.
    #[must_use]
    pub fn withdraw_args(key: &RouteKey) -> Vec<String> {
        rib_args(key.prefix, "del")
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        let mut full = self.connection_args.clone();
        full.extend(args);
        let command_line = full.join(" ");

        debug!(cli = %self.config.cli_path, args = %command_line, "Running gobgp");

        let child = Command::new(&self.config.cli_path)
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("{}: {e}", self.config.cli_path)))?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::timeout(u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX))
            })?
            .map_err(|e| Error::spawn_failed(format!("failed to wait for gobgp: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::command_failed(
                command_line,
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn rib_args(prefix: Prefix, verb: &str) -> Vec<String> {
    let family = if prefix.is_ipv4() { "ipv4" } else { "ipv6" };
    vec![
        "global".to_string(),
        "rib".to_string(),
        "-a".to_string(),
        family.to_string(),
        verb.to_string(),
        prefix.to_string(),
    ]
}

#[async_trait]
impl Speaker for GobgpCli {
    async fn announce(&self, route: &Route, _replaces: Option<&RouteKey>) -> Result<()> {
        // GoBGP replaces the local path for the prefix on add.
        self.run(Self::announce_args(route)).await
    }

    async fn withdraw(&self, key: &RouteKey) -> Result<()> {
        self.run(Self::withdraw_args(key)).await
    }

    async fn health_check(&self) -> Result<()> {
        self.run(vec!["global".to_string()])
            .await
            .map_err(|e| Error::unavailable(e.to_string()))
    }
}
