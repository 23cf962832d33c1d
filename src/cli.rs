//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// CoreBGP updater
#[derive(Parser, Debug, Default)]
#[command(name = "updater")]
#[command(version)]
#[command(about = "Keeps a local GoBGP speaker in line with the CoreBGP announcement store")]
#[command(
    long_about = "Watches the CoreBGP API for announcement changes and advertises or withdraws the matching routes on the local GoBGP daemon. Flags override values from --config."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// CoreBGP API server URL
    #[arg(long, value_name = "URL")]
    pub api_endpoint: Option<String>,

    /// GoBGP gRPC endpoint
    #[arg(long, value_name = "HOST:PORT")]
    pub gobgp_endpoint: Option<String>,

    /// CA certificate for a TLS-enabled GoBGP endpoint
    #[arg(long, value_name = "PATH")]
    pub gobgp_ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS with GoBGP
    #[arg(long, value_name = "PATH", requires = "gobgp_client_key")]
    pub gobgp_client_cert: Option<PathBuf>,

    /// Client key for mutual TLS with GoBGP
    #[arg(long, value_name = "PATH", requires = "gobgp_client_cert")]
    pub gobgp_client_key: Option<PathBuf>,

    /// Path to the gobgp executable
    #[arg(long, value_name = "PATH")]
    pub gobgp_cli: Option<String>,

    /// Append logs to this file, "-" for stderr (default /var/log/corebgp/updater.log)
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<String>,

    /// More output per occurrence (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
