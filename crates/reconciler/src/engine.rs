//! Reconciliation engine.
//!
//! Sole owner of [`DesiredState`] and [`RouteTracker`]. Watch events update
//! the desired side, the diff marks routes dirty or withdrawing, and
//! [`Reconciler::reconcile_once`] pushes the difference to the speaker.
//! Announces run before withdraws in every cycle so a route is never
//! missing while its replacement is on the way.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use corebgp_core::{Announcement, Prefix, Revision, Route, RouteKey, WatchEvent};
use corebgp_speaker::Speaker;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::desired::{DesiredState, Removal, Upsert};
use crate::retry::{should_warn, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::status::{DegradedRoute, StatusReceiver, StatusSnapshot};
use crate::tracker::{RouteState, RouteTracker, TrackedRoute};

/// Item on the engine queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    /// Produced by the watch session.
    Event(WatchEvent),
    /// Produced by a retry timer once the key's backoff elapsed.
    Retry(RouteKey),
}

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Desired state changed and speaker work was created.
    Applied,
    /// Desired state changed but the speaker already matches.
    Unchanged,
    /// Revision not newer than known; ignored.
    Stale,
    /// Announcement unusable; ignored.
    Rejected,
    /// Desired state replaced wholesale.
    Resynced { dirty: usize, withdrawing: usize },
    /// Stream error noted.
    StreamError,
}

/// What one reconcile cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub announced: Vec<RouteKey>,
    pub withdrawn: Vec<RouteKey>,
    pub failed: Vec<RouteKey>,
    /// Keys waiting on backoff, with the instant they become due.
    pub deferred: Vec<(RouteKey, Instant)>,
}

impl CycleReport {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.announced.len() + self.withdrawn.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.calls() == 0 && self.deferred.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    revision: Revision,
    synced: bool,
    stale_events: u64,
    rejected_events: u64,
    resyncs: u64,
    stream_errors: u64,
    last_stream_error: Option<String>,
}

/// Single-writer reconciler between the store and one speaker.
pub struct Reconciler {
    speaker: Arc<dyn Speaker>,
    desired: DesiredState,
    tracker: RouteTracker,
    policy: RetryPolicy,
    degraded_after: u32,
    counters: Counters,
    status: watch::Sender<StatusSnapshot>,
}

impl Reconciler {
    /// Create a reconciler driving `speaker`.
    pub fn new(speaker: Arc<dyn Speaker>, config: &ControllerConfig) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::default());
        Self {
            speaker,
            desired: DesiredState::new(),
            tracker: RouteTracker::new(),
            policy: config.retry_policy(),
            degraded_after: config.degraded_after,
            counters: Counters::default(),
            status,
        }
    }

    /// Subscribe to status snapshots.
    #[must_use]
    pub fn subscribe(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    #[must_use]
    pub const fn desired(&self) -> &DesiredState {
        &self.desired
    }

    #[must_use]
    pub const fn tracker(&self) -> &RouteTracker {
        &self.tracker
    }

    /// Fold one watch event into desired state and mark the affected routes.
    pub fn apply_event(&mut self, event: WatchEvent) -> EventOutcome {
        let outcome = match event {
            WatchEvent::Added {
                announcement,
                revision,
            }
            | WatchEvent::Modified {
                announcement,
                revision,
            } => self.apply_upsert(announcement, revision),
            WatchEvent::Deleted {
                announcement,
                revision,
            } => self.apply_delete(&announcement, revision),
            WatchEvent::Resynced {
                announcements,
                revision,
            } => self.apply_resync(announcements, revision),
            WatchEvent::Error { reason } => {
                self.counters.stream_errors += 1;
                self.counters.last_stream_error = Some(reason);
                EventOutcome::StreamError
            }
        };
        self.publish_status();
        outcome
    }

    fn note_revision(&mut self, revision: Revision) {
        self.counters.revision = self.counters.revision.max(revision);
    }

    fn stale(&mut self, kind: &str, key: &str, revision: Revision) -> EventOutcome {
        self.counters.stale_events += 1;
        debug!(kind, key, revision = %revision, "Ignoring stale event");
        EventOutcome::Stale
    }

    fn apply_upsert(&mut self, announcement: Announcement, revision: Revision) -> EventOutcome {
        if let Err(e) = announcement.validate() {
            self.counters.rejected_events += 1;
            warn!(key = %announcement.key(), error = %e, "Rejecting announcement");
            return EventOutcome::Rejected;
        }

        let key = announcement.key();
        let prefix = announcement.prefix;
        let previous = match self.desired.upsert(announcement, revision) {
            Upsert::Stale => return self.stale("upsert", &key.to_string(), revision),
            Upsert::Applied { previous } => previous,
        };
        self.note_revision(revision);

        let mut work = false;
        if let Some(old) = previous.filter(|p| p.prefix != prefix) {
            work |= self.sync_prefix(old.prefix, self.desired.winner(old.prefix));
        }
        work |= self.sync_prefix(prefix, self.desired.winner(prefix));

        debug!(key = %key, prefix = %prefix, revision = %revision, "Applied announcement");
        if work {
            EventOutcome::Applied
        } else {
            EventOutcome::Unchanged
        }
    }

    fn apply_delete(&mut self, announcement: &Announcement, revision: Revision) -> EventOutcome {
        let key = announcement.key();
        let removed = match self.desired.remove(&key, revision) {
            Removal::Stale => return self.stale("delete", &key.to_string(), revision),
            Removal::Removed(removed) => removed,
            Removal::Absent => announcement.clone(),
        };
        self.note_revision(revision);

        let prefix = removed.prefix;
        debug!(key = %key, prefix = %prefix, revision = %revision, "Removed announcement");
        if self.sync_prefix(prefix, self.desired.winner(prefix)) {
            EventOutcome::Applied
        } else {
            EventOutcome::Unchanged
        }
    }

    fn apply_resync(&mut self, announcements: Vec<Announcement>, revision: Revision) -> EventOutcome {
        let (valid, invalid): (Vec<_>, Vec<_>) =
            announcements.into_iter().partition(|a| a.validate().is_ok());
        for bad in &invalid {
            warn!(key = %bad.key(), "Rejecting announcement from listing");
        }
        self.counters.rejected_events += u64::try_from(invalid.len()).unwrap_or(u64::MAX);

        self.desired.replace(valid, revision);
        self.counters.resyncs += 1;
        self.counters.synced = true;
        self.note_revision(revision);

        let mut winners = self.desired.winners();
        let prefixes: BTreeSet<Prefix> = self
            .tracker
            .keys()
            .into_iter()
            .map(|k| k.prefix)
            .chain(winners.keys().copied())
            .collect();
        for prefix in prefixes {
            let winner = winners.remove(&prefix);
            self.sync_prefix(prefix, winner);
        }

        let dirty = self.tracker.count(RouteState::Pending);
        let withdrawing = self.tracker.count(RouteState::Withdrawing);
        info!(
            revision = %revision,
            desired = self.desired.len(),
            dirty,
            withdrawing,
            "Resynced desired state"
        );
        EventOutcome::Resynced { dirty, withdrawing }
    }

    /// Bring the tracker in line with the desired route for one prefix.
    ///
    /// With a winner, every other key on the prefix is superseded by it: the
    /// speaker withdraws by prefix, so withdrawing them would take the winner
    /// down too. Without one, every key on the prefix is withdrawn. Returns
    /// true if this left speaker work on the prefix.
    fn sync_prefix(&mut self, prefix: Prefix, winner: Option<Route>) -> bool {
        let others = self.tracker.keys_on(prefix);
        let Some(route) = winner else {
            let mut work = false;
            for key in others {
                work |= self.tracker.mark_withdraw(&key);
            }
            return work;
        };

        let mut replaces = None;
        for key in others.into_iter().filter(|k| *k != route.key) {
            if let Some(old) = self.tracker.supersede(key, route.key) {
                replaces.get_or_insert(old);
            }
        }
        let key = route.key;
        let created = self.tracker.set_target(route, replaces);
        created || self.tracker.get(&key).is_some_and(|e| e.state == RouteState::Pending)
    }

    /// Push every due announce, then every due withdraw.
    pub async fn reconcile_once(&mut self) -> CycleReport {
        self.cycle(Some(Instant::now())).await
    }

    /// Like `reconcile_once` but ignores backoff.
    pub async fn reconcile_all(&mut self) -> CycleReport {
        self.cycle(None).await
    }

    async fn cycle(&mut self, now: Option<Instant>) -> CycleReport {
        let work = self.tracker.due_work(now);
        let mut report = CycleReport {
            deferred: work.deferred,
            ..Default::default()
        };

        for key in work.announces {
            let Some(entry) = self.tracker.get(&key) else {
                continue;
            };
            let Some(route) = entry.target.clone() else {
                continue;
            };
            let replaces = entry.replaces;

            match self.speaker.announce(&route, replaces.as_ref()).await {
                Ok(()) => {
                    let replaced = self.tracker.announce_succeeded(&key);
                    info!(route = %key, replaced = replaced.len(), "Announced route");
                    report.announced.push(key);
                }
                Err(e) => {
                    let due = self.record_failure(&key, "announce", &e.to_string());
                    report.failed.push(key);
                    report.deferred.push((key, due));
                }
            }
        }

        for key in work.withdraws {
            // An announce earlier in this cycle may have replaced it.
            if !self.tracker.get(&key).is_some_and(TrackedRoute::needs_call) {
                continue;
            }
            match self.speaker.withdraw(&key).await {
                Ok(()) => {
                    self.tracker.withdraw_succeeded(&key);
                    info!(route = %key, "Withdrew route");
                    report.withdrawn.push(key);
                }
                Err(e) => {
                    let due = self.record_failure(&key, "withdraw", &e.to_string());
                    report.failed.push(key);
                    report.deferred.push((key, due));
                }
            }
        }

        self.publish_status();
        report
    }

    fn record_failure(&mut self, key: &RouteKey, call: &str, error: &str) -> Instant {
        let failures = self
            .tracker
            .get(key)
            .map_or(1, |e| e.retry.failures.saturating_add(1));
        let delay = self.policy.delay(failures);
        let due = Instant::now() + delay;
        self.tracker.call_failed(key, error.to_string(), due);

        if failures == self.degraded_after {
            warn!(route = %key, call, failures, error, "Route degraded");
        } else if should_warn(failures) {
            warn!(route = %key, call, failures, retry_in = ?delay, error, "Speaker call failed");
        } else {
            debug!(route = %key, call, failures, retry_in = ?delay, error, "Speaker call failed");
        }
        due
    }

    /// Current status, as published.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            synced: self.counters.synced,
            revision: self.counters.revision,
            desired: self.desired.len(),
            advertised: self.tracker.count(RouteState::Advertised),
            pending: self.tracker.count(RouteState::Pending),
            withdrawing: self
                .tracker
                .iter()
                .filter(|(_, e)| e.state == RouteState::Withdrawing && e.needs_call())
                .count(),
            degraded: self
                .tracker
                .failing(self.degraded_after)
                .map(|(key, e)| DegradedRoute {
                    key: *key,
                    failures: e.retry.failures,
                    last_error: e.retry.last_error.clone(),
                })
                .collect(),
            stale_events: self.counters.stale_events,
            rejected_events: self.counters.rejected_events,
            resyncs: self.counters.resyncs,
            stream_errors: self.counters.stream_errors,
            last_stream_error: self.counters.last_stream_error.clone(),
        }
    }

    fn publish_status(&self) {
        let snapshot = self.snapshot();
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    /// Consume the queue until shutdown or until every producer is gone.
    ///
    /// `retries` is a weak handle on the same queue; retry timers use it so
    /// they never keep the queue open on their own. On exit the queue is
    /// drained and one last cycle runs, ignoring backoff and scheduling no
    /// retries. Returns the final status.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<EngineInput>,
        retries: mpsc::WeakSender<EngineInput>,
        mut shutdown: Shutdown,
    ) -> StatusSnapshot {
        let mut timers: HashSet<RouteKey> = HashSet::new();
        info!("Reconciliation engine started");

        loop {
            let input = tokio::select! {
                biased;
                signal = shutdown.wait() => {
                    info!(%signal, "Engine stopping");
                    break;
                }
                input = inputs.recv() => match input {
                    Some(input) => input,
                    None => {
                        info!("Engine queue closed");
                        break;
                    }
                },
            };

            match input {
                EngineInput::Event(event) => {
                    let kind = event.kind();
                    let outcome = self.apply_event(event);
                    debug!(kind, ?outcome, "Applied event");
                }
                EngineInput::Retry(key) => {
                    timers.remove(&key);
                }
            }

            let report = self.reconcile_once().await;
            for (key, due) in report.deferred {
                if timers.insert(key) {
                    spawn_retry_timer(key, due, retries.clone(), shutdown.clone());
                }
            }
        }

        inputs.close();
        let mut drained = 0usize;
        while let Ok(input) = inputs.try_recv() {
            if let EngineInput::Event(event) = input {
                self.apply_event(event);
                drained += 1;
            }
        }
        let report = self.reconcile_all().await;
        let status = self.snapshot();
        info!(
            drained,
            announced = report.announced.len(),
            withdrawn = report.withdrawn.len(),
            failed = report.failed.len(),
            converged = status.is_converged(),
            "Reconciliation engine stopped"
        );
        status
    }
}

fn spawn_retry_timer(
    key: RouteKey,
    due: Instant,
    retries: mpsc::WeakSender<EngineInput>,
    mut shutdown: Shutdown,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.wait() => {}
            () = tokio::time::sleep_until(due) => {
                if let Some(tx) = retries.upgrade() {
                    let _ = tx.send(EngineInput::Retry(key)).await;
                }
            }
        }
    });
}
