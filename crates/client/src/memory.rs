//! In-memory announcement store.
//!
//! Linearizable, with a single revision counter and a replayable change
//! log, so `list` + `watch(revision + 1)` behaves like the real store. The
//! log keeps only the most recent changes; a watch from an older revision
//! fails and the caller has to list again. Test hooks can break every open
//! watch, inject undecodable frames and make the store unreachable.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use corebgp_core::{Announcement, AnnouncementKey, Revision, WatchEvent};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};
use crate::store::{AnnouncementStore, Snapshot, WatchStream};

const FEED_CAPACITY: usize = 1024;
const STREAM_BUFFER: usize = 64;
const DEFAULT_LOG_LIMIT: usize = 4096;

/// Item on the internal change feed.
#[derive(Debug, Clone)]
enum FeedItem {
    Event(WatchEvent),
    /// Delivered to watchers as `Error::Decode`.
    Garbage(String),
}

#[derive(Default)]
struct State {
    revision: Revision,
    announcements: BTreeMap<AnnouncementKey, Announcement>,
    /// Recent changes in revision order.
    log: VecDeque<WatchEvent>,
    /// Newest revision dropped from `log`.
    compacted: Revision,
}

/// In-memory store for tests and local runs.
pub struct InMemoryStore {
    state: Mutex<State>,
    feed: broadcast::Sender<FeedItem>,
    disconnect: watch::Sender<u64>,
    unavailable: AtomicBool,
    log_limit: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store at revision zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_log_limit(DEFAULT_LOG_LIMIT)
    }

    /// Create an empty store that replays at most `limit` past changes.
    #[must_use]
    pub fn with_log_limit(limit: usize) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (disconnect, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            feed,
            disconnect,
            unavailable: AtomicBool::new(false),
            log_limit: limit.max(1),
        }
    }

    /// Create a new store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Current store revision.
    pub async fn revision(&self) -> Revision {
        self.state.lock().await.revision
    }

    /// End every open watch stream, as if the connection dropped.
    pub fn disconnect_watchers(&self) {
        self.disconnect.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Send an undecodable frame to every open watch stream.
    pub fn inject_garbage(&self, reason: impl Into<String>) {
        let _ = self.feed.send(FeedItem::Garbage(reason.into()));
    }

    /// Make `list`, `watch` and `health_check` fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(Error::connection_failed("store unavailable"))
        } else {
            Ok(())
        }
    }

    fn record(&self, state: &mut State, event: WatchEvent) {
        state.log.push_back(event.clone());
        while state.log.len() > self.log_limit {
            if let Some(dropped) = state.log.pop_front().and_then(|e| e.revision()) {
                state.compacted = dropped;
            }
        }
        let _ = self.feed.send(FeedItem::Event(event));
    }
}

#[async_trait]
impl AnnouncementStore for InMemoryStore {
    async fn get(&self, key: &AnnouncementKey) -> Result<Announcement> {
        let state = self.state.lock().await;
        state
            .announcements
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.clone()))
    }

    async fn create(&self, announcement: &Announcement) -> Result<Revision> {
        announcement
            .validate()
            .map_err(|e| Error::decode(e.to_string()))?;

        let mut state = self.state.lock().await;
        let key = announcement.key();
        if state.announcements.contains_key(&key) {
            return Err(Error::conflict(key));
        }

        let revision = state.revision.next();
        state.revision = revision;
        let stored = announcement.clone().with_revision(revision);
        state.announcements.insert(key, stored.clone());
        self.record(&mut state, WatchEvent::added(stored));
        Ok(revision)
    }

    async fn update(&self, announcement: &Announcement) -> Result<Revision> {
        announcement
            .validate()
            .map_err(|e| Error::decode(e.to_string()))?;

        let mut state = self.state.lock().await;
        let key = announcement.key();
        if !state.announcements.contains_key(&key) {
            return Err(Error::not_found(key));
        }

        let revision = state.revision.next();
        state.revision = revision;
        let stored = announcement.clone().with_revision(revision);
        state.announcements.insert(key, stored.clone());
        self.record(&mut state, WatchEvent::modified(stored));
        Ok(revision)
    }

    async fn delete(&self, key: &AnnouncementKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let removed = state
            .announcements
            .remove(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        let revision = state.revision.next();
        state.revision = revision;
        self.record(&mut state, WatchEvent::deleted(removed, revision));
        Ok(())
    }

    async fn list(&self) -> Result<Snapshot> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(Snapshot {
            announcements: state.announcements.values().cloned().collect(),
            revision: state.revision,
        })
    }

    async fn watch(&self, from: Revision) -> Result<WatchStream> {
        self.check_available()?;

        // Backlog and subscription are taken under the same lock so no
        // change can fall between them.
        let (backlog, mut live) = {
            let state = self.state.lock().await;
            if state.compacted > Revision::ZERO && from <= state.compacted {
                return Err(Error::stream_closed(format!(
                    "revision {from} compacted, oldest kept is {}",
                    state.compacted.next()
                )));
            }
            let backlog: Vec<WatchEvent> = state
                .log
                .iter()
                .filter(|event| event.revision().is_some_and(|r| r >= from))
                .cloned()
                .collect();
            (backlog, self.feed.subscribe())
        };
        let mut disconnect = self.disconnect.subscribe();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            for event in backlog {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            loop {
                tokio::select! {
                    _ = disconnect.changed() => break,
                    received = live.recv() => {
                        let item = match received {
                            Ok(FeedItem::Event(event)) => Ok(event),
                            Ok(FeedItem::Garbage(reason)) => Err(Error::decode(reason)),
                            Err(RecvError::Lagged(skipped)) => {
                                let _ = tx
                                    .send(Err(Error::stream_closed(format!(
                                        "watcher lagged by {skipped} events"
                                    ))))
                                    .await;
                                break;
                            }
                            Err(RecvError::Closed) => break,
                        };
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}
