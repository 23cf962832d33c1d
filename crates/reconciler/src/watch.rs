//! Watch session: keeps one logical watch on the store open.
//!
//! Every (re)connect is a full list followed by a watch from the next
//! revision, so each gap in the stream is closed by a `Resynced` event. The
//! session is the only caller of `list` and `watch`.

use std::sync::Arc;
use std::time::Duration;

use corebgp_client::AnnouncementStore;
use corebgp_core::{Revision, WatchEvent};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::engine::EngineInput;
use crate::error::{Error, Result};
use crate::retry::{should_warn, Backoff};
use crate::shutdown::Shutdown;

/// How one watch stream ended.
#[derive(Debug)]
enum StreamEnd {
    Cancelled,
    Broken { reason: String, delivered: u64 },
}

/// Producer side of the engine queue.
pub struct WatchSession {
    store: Arc<dyn AnnouncementStore>,
    events: mpsc::Sender<EngineInput>,
    backoff: Backoff,
    decode_error_threshold: u32,
    startup_timeout: Duration,
    shutdown: Shutdown,
}

impl WatchSession {
    pub fn new(
        store: Arc<dyn AnnouncementStore>,
        events: mpsc::Sender<EngineInput>,
        config: &ControllerConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            events,
            backoff: Backoff::new(config.retry_policy()),
            decode_error_threshold: config.decode_error_threshold,
            startup_timeout: config.startup_timeout,
            shutdown,
        }
    }

    /// Run until shutdown or until the engine goes away.
    ///
    /// # Errors
    ///
    /// Returns `Error::StartupTimeout` if the first resync does not finish
    /// inside the startup window. Later failures are retried forever.
    pub async fn run(mut self) -> Result<()> {
        let mut last_error = None;
        let first = tokio::time::timeout(
            self.startup_timeout,
            self.resync_until_ok(true, &mut last_error),
        )
        .await;

        let mut revision = match first {
            Ok(Some(revision)) => revision,
            Ok(None) => return Ok(()),
            Err(_) => {
                return Err(Error::startup_timeout(self.startup_timeout, last_error));
            }
        };
        info!(revision = %revision, "Initial resync complete");

        loop {
            match self.follow(revision).await {
                StreamEnd::Cancelled => return Ok(()),
                StreamEnd::Broken { reason, delivered } => {
                    warn!(reason = %reason, delivered, "Watch stream broke, resyncing");
                    if !self.send(WatchEvent::error(reason)).await {
                        return Ok(());
                    }
                    if delivered > 0 {
                        self.backoff.reset();
                    }
                    let delay = self.backoff.next_delay();
                    if !self.sleep(delay).await {
                        return Ok(());
                    }
                }
            }

            let mut last_error = None;
            revision = match self.resync_until_ok(false, &mut last_error).await {
                Some(revision) => revision,
                None => return Ok(()),
            };
        }
    }

    /// List and emit `Resynced`, retrying with backoff. `None` means the
    /// session was cancelled.
    async fn resync_until_ok(
        &mut self,
        check_health: bool,
        last_error: &mut Option<String>,
    ) -> Option<Revision> {
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            match self.resync(check_health).await {
                Ok(Some(revision)) => {
                    return Some(revision);
                }
                Ok(None) => return None,
                Err(e) => {
                    let attempt = self.backoff.attempt().saturating_add(1);
                    if should_warn(attempt) {
                        warn!(error = %e, attempt, "Resync failed");
                    } else {
                        debug!(error = %e, attempt, "Resync failed");
                    }
                    *last_error = Some(e.to_string());
                    let delay = self.backoff.next_delay();
                    if !self.sleep(delay).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn resync(&mut self, check_health: bool) -> corebgp_client::Result<Option<Revision>> {
        if check_health {
            self.store.health_check().await?;
        }
        let snapshot = self.store.list().await?;
        let revision = snapshot.revision;
        debug!(
            revision = %revision,
            announcements = snapshot.announcements.len(),
            "Listed announcements"
        );
        let delivered = self
            .send(WatchEvent::resynced(snapshot.announcements, revision))
            .await;
        Ok(delivered.then_some(revision))
    }

    /// Forward events from one watch stream until it ends.
    async fn follow(&mut self, revision: Revision) -> StreamEnd {
        let mut stream = match self.store.watch(revision.next()).await {
            Ok(stream) => stream,
            Err(e) => {
                return StreamEnd::Broken {
                    reason: format!("failed to open watch: {e}"),
                    delivered: 0,
                };
            }
        };
        debug!(from = %revision.next(), "Watching announcements");

        let mut delivered = 0u64;
        let mut decode_errors = 0u32;
        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.wait() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };

            let event = match item {
                None => {
                    return StreamEnd::Broken {
                        reason: "stream closed by store".to_string(),
                        delivered,
                    };
                }
                Some(Ok(WatchEvent::Error { reason })) => {
                    return StreamEnd::Broken {
                        reason: format!("store reported error: {reason}"),
                        delivered,
                    };
                }
                Some(Ok(event)) => event,
                Some(Err(e)) if e.is_decode() => {
                    decode_errors += 1;
                    warn!(error = %e, decode_errors, "Skipping undecodable watch frame");
                    if decode_errors > self.decode_error_threshold {
                        return StreamEnd::Broken {
                            reason: format!("{decode_errors} consecutive undecodable frames"),
                            delivered,
                        };
                    }
                    continue;
                }
                Some(Err(e)) => {
                    return StreamEnd::Broken {
                        reason: e.to_string(),
                        delivered,
                    };
                }
            };

            decode_errors = 0;
            if !self.send(event).await {
                return StreamEnd::Cancelled;
            }
            delivered += 1;
        }
    }

    /// Hand an event to the engine. False once cancelled or the engine is
    /// gone; nothing is sent after cancellation is observed.
    async fn send(&mut self, event: WatchEvent) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            sent = self.events.send(EngineInput::Event(event)) => sent.is_ok(),
        }
    }

    /// Sleep unless cancelled first. False if cancelled.
    async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
