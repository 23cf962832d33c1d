//! Status logging for the `updater` binary.
//!
//! Follows the controller's status channel and logs transitions: the first
//! resync, routes turning degraded or recovering, and the speaker catching
//! up with the store.

use std::collections::BTreeSet;

use corebgp_core::{Revision, RouteKey};
use corebgp_reconciler::{StatusReceiver, StatusSnapshot};
use tracing::{info, warn};

/// A transition between two snapshots worth a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The first resync was applied.
    Synced { revision: Revision, desired: usize },
    /// Routes that crossed the failure threshold.
    Degraded(Vec<RouteKey>),
    /// Routes that were degraded and no longer are.
    Recovered(Vec<RouteKey>),
    /// Nothing left to push after a period with work outstanding.
    Converged { revision: Revision, advertised: usize },
}

fn degraded_keys(status: &StatusSnapshot) -> BTreeSet<RouteKey> {
    status.degraded.iter().map(|d| d.key).collect()
}

/// Transitions from `prev` to `next`, in the order they should be logged.
#[must_use]
pub fn describe_change(prev: &StatusSnapshot, next: &StatusSnapshot) -> Vec<StatusChange> {
    let mut changes = Vec::new();

    if next.synced && !prev.synced {
        changes.push(StatusChange::Synced {
            revision: next.revision,
            desired: next.desired,
        });
    }

    let before = degraded_keys(prev);
    let after = degraded_keys(next);
    let degraded: Vec<_> = after.difference(&before).copied().collect();
    let recovered: Vec<_> = before.difference(&after).copied().collect();
    if !degraded.is_empty() {
        changes.push(StatusChange::Degraded(degraded));
    }
    if !recovered.is_empty() {
        changes.push(StatusChange::Recovered(recovered));
    }

    if next.synced && next.is_converged() && !(prev.synced && prev.is_converged()) {
        changes.push(StatusChange::Converged {
            revision: next.revision,
            advertised: next.advertised,
        });
    }

    changes
}

fn log_change(change: &StatusChange, status: &StatusSnapshot) {
    match change {
        StatusChange::Synced { revision, desired } => {
            info!(revision = %revision, desired, "Initial resync applied");
        }
        StatusChange::Degraded(keys) => {
            for key in keys {
                let failure = status.degraded.iter().find(|d| d.key == *key);
                warn!(
                    route = %key,
                    failures = failure.map_or(0, |d| d.failures),
                    last_error = failure.and_then(|d| d.last_error.as_deref()).unwrap_or(""),
                    "Route degraded"
                );
            }
        }
        StatusChange::Recovered(keys) => {
            for key in keys {
                info!(route = %key, "Route recovered");
            }
        }
        StatusChange::Converged {
            revision,
            advertised,
        } => {
            info!(revision = %revision, advertised, "Speaker in sync with store");
        }
    }
}

/// Log status transitions until the controller drops its sender.
pub async fn report_status(mut status: StatusReceiver) {
    let mut last = status.borrow_and_update().clone();
    while status.changed().await.is_ok() {
        let next = status.borrow_and_update().clone();
        for change in describe_change(&last, &next) {
            log_change(&change, &next);
        }
        last = next;
    }
}
