//! The store seam the reconciler depends on.

use std::pin::Pin;

use async_trait::async_trait;
use corebgp_core::{Announcement, AnnouncementKey, Revision, WatchEvent};
use futures::Stream;

use crate::error::Result;

/// Stream of watch events. `Err(Error::Decode)` items are per-frame and
/// non-fatal; any other error, or the end of the stream, means the session
/// is over and the caller must resync.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// Full store contents at a single revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub announcements: Vec<Announcement>,
    pub revision: Revision,
}

/// Trait for announcement store backends.
#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    /// Fetch one announcement.
    async fn get(&self, key: &AnnouncementKey) -> Result<Announcement>;

    /// Create an announcement, returning the revision it was written at.
    /// Fails with `Error::Conflict` if the key exists.
    async fn create(&self, announcement: &Announcement) -> Result<Revision>;

    /// Replace an existing announcement. Fails with `Error::NotFound`.
    async fn update(&self, announcement: &Announcement) -> Result<Revision>;

    /// Remove an announcement. Fails with `Error::NotFound`.
    async fn delete(&self, key: &AnnouncementKey) -> Result<()>;

    /// List every announcement at one consistent revision.
    async fn list(&self) -> Result<Snapshot>;

    /// Stream changes with revision >= `from`.
    async fn watch(&self, from: Revision) -> Result<WatchStream>;

    /// Liveness check.
    async fn health_check(&self) -> Result<()>;
}
