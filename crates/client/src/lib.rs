#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # corebgp-client
//!
//! Client side of the CoreBGP announcement store.
//!
//! - [`AnnouncementStore`]: the narrow seam the reconciler depends on
//!   (CRUD, consistent list, revision-addressable watch).
//! - [`ApiClient`]: talks to the API server over HTTP, watches over WebSocket.
//! - [`InMemoryStore`]: same contract in process, for tests and local runs.
//!
//! ## Example
//!
//! ```ignore
//! use corebgp_client::{AnnouncementStore, ApiClient};
//!
//! let client = ApiClient::with_url("http://localhost:8080")?;
//! client.health_check().await?;
//! let snapshot = client.list().await?;
//! let mut events = client.watch(snapshot.revision.next()).await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod store;
pub mod wire;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use http::ApiClient;
pub use memory::InMemoryStore;
pub use store::{AnnouncementStore, Snapshot, WatchStream};
