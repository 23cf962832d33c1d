//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use corebgp_core::{Announcement, Community, Prefix, Revision};
use corebgp_reconciler::{ControllerConfig, Reconciler};
use corebgp_speaker::{MemorySpeaker, SpeakerCall};

pub fn prefix(s: &str) -> Prefix {
    s.parse().unwrap()
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Announcement `edge/<name>` at `revision`.
pub fn announcement(name: &str, prefix_str: &str, next_hop: &str, revision: u64) -> Announcement {
    Announcement::new("edge", name, prefix(prefix_str), ip(next_hop))
        .with_revision(Revision::new(revision))
}

pub fn with_community(announcement: Announcement, value: u16) -> Announcement {
    announcement.with_communities(vec![Community::new(65000, value)])
}

/// Small backoff so paused-clock tests advance quickly.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(100))
        .with_degraded_after(3)
        .with_startup_timeout(Duration::from_secs(5))
}

pub fn engine(speaker: &Arc<MemorySpeaker>) -> Reconciler {
    Reconciler::new(speaker.clone(), &fast_config())
}

pub fn withdraws(calls: &[SpeakerCall]) -> usize {
    calls.iter().filter(|c| c.is_withdraw()).count()
}

pub fn announces(calls: &[SpeakerCall]) -> usize {
    calls.iter().filter(|c| !c.is_withdraw()).count()
}
