//! In-memory speaker.
//!
//! Keeps a RIB of originated routes and a log of every call attempt. Like
//! GoBGP originating without add-path, it holds one path per prefix:
//! announcing replaces the path and withdrawing removes it whatever its next
//! hop. Failures can be injected per prefix or globally.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use corebgp_core::{Prefix, Route, RouteKey};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::speaker::Speaker;

/// One call made against the speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerCall {
    Announce {
        route: Route,
        replaces: Option<RouteKey>,
    },
    Withdraw {
        key: RouteKey,
    },
}

impl SpeakerCall {
    #[must_use]
    pub const fn is_withdraw(&self) -> bool {
        matches!(self, Self::Withdraw { .. })
    }

    #[must_use]
    pub const fn prefix(&self) -> Prefix {
        match self {
            Self::Announce { route, .. } => route.key.prefix,
            Self::Withdraw { key } => key.prefix,
        }
    }
}

#[derive(Default)]
struct Inner {
    rib: BTreeMap<Prefix, Route>,
    calls: Vec<SpeakerCall>,
    failing: HashSet<Prefix>,
    down: bool,
}

/// Speaker that keeps its RIB in memory.
#[derive(Default)]
pub struct MemorySpeaker {
    inner: Mutex<Inner>,
}

impl MemorySpeaker {
    /// Create an empty speaker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new speaker wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Fail every call touching `prefix` until healed.
    pub async fn fail_prefix(&self, prefix: Prefix) {
        self.inner.lock().await.failing.insert(prefix);
    }

    /// Stop failing calls for `prefix`.
    pub async fn heal_prefix(&self, prefix: Prefix) {
        self.inner.lock().await.failing.remove(&prefix);
    }

    /// Fail every call while `down` is set.
    pub async fn set_down(&self, down: bool) {
        self.inner.lock().await.down = down;
    }

    /// Every call attempted so far, failed ones included.
    pub async fn calls(&self) -> Vec<SpeakerCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Forget the call log.
    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Routes currently originated, one per prefix.
    pub async fn rib(&self) -> BTreeMap<Prefix, Route> {
        self.inner.lock().await.rib.clone()
    }

    /// Seed a route as if it were already originated (e.g. left over from
    /// a previous controller run).
    pub async fn preload(&self, route: Route) {
        self.inner.lock().await.rib.insert(route.prefix(), route);
    }
}

impl Inner {
    fn check(&self, prefix: Prefix) -> Result<()> {
        if self.down {
            return Err(Error::unavailable("speaker down"));
        }
        if self.failing.contains(&prefix) {
            return Err(Error::command_failed(
                format!("rib {prefix}"),
                "injected",
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Speaker for MemorySpeaker {
    async fn announce(&self, route: &Route, replaces: Option<&RouteKey>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(SpeakerCall::Announce {
            route: route.clone(),
            replaces: replaces.copied(),
        });
        inner.check(route.prefix())?;
        inner.rib.insert(route.prefix(), route.clone());
        Ok(())
    }

    async fn withdraw(&self, key: &RouteKey) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(SpeakerCall::Withdraw { key: *key });
        inner.check(key.prefix)?;
        inner.rib.remove(&key.prefix);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.inner.lock().await.down {
            Err(Error::unavailable("speaker down"))
        } else {
            Ok(())
        }
    }
}
