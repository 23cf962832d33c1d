//! Read-only status published by the engine.
//!
//! The engine owns its maps; everyone else sees a copied
//! [`StatusSnapshot`] through a `watch` channel.

use corebgp_core::{Revision, RouteKey};
use serde::Serialize;
use tokio::sync::watch;

/// Route that kept failing past the degraded threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedRoute {
    pub key: RouteKey,
    pub failures: u32,
    pub last_error: Option<String>,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// At least one resync has been applied.
    pub synced: bool,
    /// Highest store revision applied.
    pub revision: Revision,
    pub desired: usize,
    pub advertised: usize,
    pub pending: usize,
    pub withdrawing: usize,
    pub degraded: Vec<DegradedRoute>,
    /// Events dropped because their revision was not newer than known.
    pub stale_events: u64,
    /// Events dropped because the announcement was unusable.
    pub rejected_events: u64,
    pub resyncs: u64,
    pub stream_errors: u64,
    pub last_stream_error: Option<String>,
}

impl StatusSnapshot {
    /// Nothing left to push to the speaker.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.pending == 0 && self.withdrawing == 0
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.synced && self.degraded.is_empty()
    }
}

/// Subscriber side of the status channel.
pub type StatusReceiver = watch::Receiver<StatusSnapshot>;
