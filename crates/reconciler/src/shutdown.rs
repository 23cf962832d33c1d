//! Shutdown signalling for controller tasks.
//!
//! One [`ShutdownTrigger`] fans out to any number of [`Shutdown`] handles
//! over a `watch` channel, so a handle created after the trigger fired still
//! observes it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Why the controller is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGTERM received.
    Sigterm,
    /// SIGINT received (Ctrl+C).
    Sigint,
    /// Requested from code.
    Programmatic,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Sending half. Dropping it counts as a programmatic shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<Option<ShutdownSignal>>,
}

/// Receiving half, cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

/// Create a connected trigger and handle.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(None);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Fire the shutdown. Only the first signal is kept.
    pub fn trigger(&self, signal: ShutdownSignal) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
    }

    /// Another handle on the same signal.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// The signal, if shutdown has started.
    #[must_use]
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.rx.borrow()
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.signal().is_some() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown has started. Cancel safe.
    pub async fn wait(&mut self) -> ShutdownSignal {
        match self.rx.wait_for(Option::is_some).await {
            Ok(signal) => (*signal).unwrap_or(ShutdownSignal::Programmatic),
            // Trigger dropped.
            Err(_) => ShutdownSignal::Programmatic,
        }
    }
}
