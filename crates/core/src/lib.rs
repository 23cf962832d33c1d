//! # corebgp-core
//!
//! Shared types for CoreBGP: announcements as stored centrally, the routes
//! they map to on a BGP speaker, and the change events a watch session emits.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod model;

pub use error::{Error, Result};
pub use event::WatchEvent;
pub use model::{
    Announcement, AnnouncementKey, Community, Prefix, Revision, Route, RouteAttributes, RouteKey,
};
