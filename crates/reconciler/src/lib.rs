//! Reconciliation controller for CoreBGP.
//!
//! Keeps the routes a BGP speaker originates in line with the announcements
//! in the central store:
//!
//! - **Watch session**: lists the store, emits a `Resynced` event, then
//!   watches from the next revision; any break is closed by a fresh resync.
//! - **Desired state**: announcements by store key, revision-checked so stale
//!   and duplicate events are no-ops.
//! - **Actual state**: per-route state machine
//!   (`Absent → Pending → Advertised → Withdrawing → Absent`).
//! - **Engine**: single writer over both, pushing the minimal set of
//!   announce/withdraw calls with per-route backoff.
//!
//! # Example
//!
//! ```ignore
//! use corebgp_client::InMemoryStore;
//! use corebgp_reconciler::{shutdown, Controller, ControllerConfig, ShutdownSignal};
//! use corebgp_speaker::MemorySpeaker;
//!
//! let (trigger, shutdown) = shutdown::channel();
//! let controller = Controller::new(
//!     InMemoryStore::new_arc(),
//!     MemorySpeaker::new_arc(),
//!     ControllerConfig::default(),
//! )?;
//! let mut status = controller.subscribe();
//! let task = tokio::spawn(controller.run(shutdown));
//!
//! status.wait_for(|s| s.synced).await?;
//! trigger.trigger(ShutdownSignal::Programmatic);
//! let final_status = task.await??;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod controller;
pub mod desired;
pub mod engine;
pub mod error;
pub mod retry;
pub mod shutdown;
pub mod status;
pub mod tracker;
pub mod watch;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use desired::DesiredState;
pub use engine::{CycleReport, EngineInput, EventOutcome, Reconciler};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownSignal, ShutdownTrigger};
pub use status::{DegradedRoute, StatusReceiver, StatusSnapshot};
pub use tracker::{RouteState, RouteTracker, TrackedRoute};
pub use watch::WatchSession;
