#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # corebgp-speaker
//!
//! BGP speaker adapters.
//!
//! - [`Speaker`]: announce/withdraw seam used by the reconciler.
//! - [`GobgpCli`]: drives a GoBGP daemon through the `gobgp` CLI.
//! - [`MemorySpeaker`]: in-memory RIB with call recording and failure
//!   injection.

pub mod config;
pub mod error;
pub mod gobgp;
pub mod memory;
pub mod speaker;

pub use config::SpeakerConfig;
pub use error::{Error, Result};
pub use gobgp::GobgpCli;
pub use memory::{MemorySpeaker, SpeakerCall};
pub use speaker::Speaker;
