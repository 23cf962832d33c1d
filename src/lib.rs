#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # CoreBGP updater
//!
//! Command line, configuration, logging and status reporting for the
//! `updater` binary. The reconciliation itself lives in `corebgp-reconciler`.

pub mod cli;
pub mod config;
pub mod logging;
pub mod report;

pub use cli::Cli;
pub use config::UpdaterConfig;
