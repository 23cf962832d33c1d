//! Wires a store, a speaker and the engine into one running controller.

use std::sync::Arc;

use corebgp_client::AnnouncementStore;
use corebgp_speaker::Speaker;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::retry::{should_warn, Backoff};
use crate::shutdown::Shutdown;
use crate::status::{StatusReceiver, StatusSnapshot};
use crate::watch::WatchSession;

/// Reconciliation controller for one speaker.
pub struct Controller {
    store: Arc<dyn AnnouncementStore>,
    speaker: Arc<dyn Speaker>,
    reconciler: Reconciler,
    config: ControllerConfig,
}

impl Controller {
    /// Build a controller.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration does not validate.
    pub fn new(
        store: Arc<dyn AnnouncementStore>,
        speaker: Arc<dyn Speaker>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(speaker.clone(), &config);
        Ok(Self {
            store,
            speaker,
            reconciler,
            config,
        })
    }

    /// Subscribe to status snapshots.
    #[must_use]
    pub fn subscribe(&self) -> StatusReceiver {
        self.reconciler.subscribe()
    }

    /// Run until `shutdown` fires. Returns the final status.
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeakerUnreachable` or `Error::StartupTimeout` if the
    /// speaker health check or the first resync does not succeed inside the startup
    /// window, and `Error::TaskFailed` if the engine task panics.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<StatusSnapshot> {
        let Self {
            store,
            speaker,
            reconciler,
            config,
        } = self;

        if !await_speaker(speaker.as_ref(), &config, &mut shutdown).await? {
            return Ok(reconciler.snapshot());
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let retries = tx.downgrade();
        let engine = tokio::spawn(reconciler.run(rx, retries, shutdown.clone()));

        // Dropping the session drops the last strong sender, which stops the
        // engine if the session ends without a shutdown.
        let session = WatchSession::new(store, tx, &config, shutdown);
        let session_result = session.run().await;
        if let Err(ref e) = session_result {
            warn!(error = %e, "Watch session failed");
        }

        let status = engine
            .await
            .map_err(|e| Error::task_failed("engine", e.to_string()))?;
        session_result.map(|()| status)
    }
}

/// Wait for the speaker to answer. `Ok(false)` means shutdown came first.
async fn await_speaker(
    speaker: &dyn Speaker,
    config: &ControllerConfig,
    shutdown: &mut Shutdown,
) -> Result<bool> {
    let mut backoff = Backoff::new(config.retry_policy());
    let mut last_error = String::new();

    let check = async {
        loop {
            match speaker.health_check().await {
                Ok(()) => return true,
                Err(e) => {
                    let attempt = backoff.attempt().saturating_add(1);
                    if should_warn(attempt) {
                        warn!(error = %e, attempt, "Speaker not ready");
                    } else {
                        debug!(error = %e, attempt, "Speaker not ready");
                    }
                    last_error = e.to_string();
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = shutdown.wait() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    };

    let outcome = tokio::time::timeout(config.startup_timeout, check).await;
    match outcome {
        Ok(ready) => {
            if ready {
                info!("Speaker reachable");
            }
            Ok(ready)
        }
        Err(_) => Err(Error::speaker_unreachable(config.startup_timeout, last_error)),
    }
}
