//! Actual state: what the controller believes the speaker carries.
//!
//! One [`TrackedRoute`] per [`RouteKey`]. A missing entry is `Absent`.
//!
//! When a route moves to a new next hop on the same prefix, the old entry is
//! kept as `Withdrawing` but `superseded_by` the new key. It is never
//! withdrawn explicitly: the speaker replaces it when the new route is
//! announced, at which point the entry is dropped. If the new route goes
//! away first, the old entry is released and withdrawn normally.

use std::collections::BTreeMap;

use corebgp_core::{Prefix, Route, RouteKey};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Per-route lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    /// Needs an announce.
    Pending,
    /// Announce confirmed.
    Advertised,
    /// Needs a withdraw.
    Withdrawing,
}

/// Consecutive failure bookkeeping for one route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub failures: u32,
    /// No call before this instant.
    pub due: Option<Instant>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRoute {
    pub state: RouteState,
    /// Route to push while `Pending`.
    pub target: Option<Route>,
    /// Last route confirmed by the speaker.
    pub advertised: Option<Route>,
    /// Route this announce implicitly replaces.
    pub replaces: Option<RouteKey>,
    /// Set on a `Withdrawing` entry whose prefix another key takes over.
    pub superseded_by: Option<RouteKey>,
    /// Some announce was attempted, so the route may be on the wire.
    pub may_be_on_wire: bool,
    /// The last call failed and its outcome is unknown.
    pub in_doubt: bool,
    pub retry: RetryState,
}

impl TrackedRoute {
    fn pending(route: Route, replaces: Option<RouteKey>) -> Self {
        Self {
            state: RouteState::Pending,
            target: Some(route),
            advertised: None,
            replaces,
            superseded_by: None,
            may_be_on_wire: false,
            in_doubt: false,
            retry: RetryState::default(),
        }
    }

    fn enter(&mut self, state: RouteState) {
        self.state = state;
        self.retry = RetryState::default();
        if state == RouteState::Withdrawing {
            self.target = None;
            self.replaces = None;
        }
    }

    /// Advertised with nothing left to push.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state == RouteState::Advertised && self.target == self.advertised
    }

    /// Whether the engine has a speaker call to make for this entry.
    #[must_use]
    pub const fn needs_call(&self) -> bool {
        match self.state {
            RouteState::Pending => true,
            RouteState::Withdrawing => self.superseded_by.is_none(),
            RouteState::Advertised => false,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        !matches!(self.retry.due, Some(due) if due > now)
    }
}

/// Work selected for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueWork {
    pub announces: Vec<RouteKey>,
    pub withdraws: Vec<RouteKey>,
    /// Work waiting on backoff, with the instant it becomes due.
    pub deferred: Vec<(RouteKey, Instant)>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTracker {
    routes: BTreeMap<RouteKey, TrackedRoute>,
}

impl RouteTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &RouteKey) -> Option<&TrackedRoute> {
        self.routes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouteKey, &TrackedRoute)> {
        self.routes.iter()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<RouteKey> {
        self.routes.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[must_use]
    pub fn count(&self, state: RouteState) -> usize {
        self.routes.values().filter(|r| r.state == state).count()
    }

    /// Routes confirmed on the speaker.
    #[must_use]
    pub fn advertised(&self) -> Vec<Route> {
        self.routes
            .values()
            .filter(|r| r.state == RouteState::Advertised)
            .filter_map(|r| r.advertised.clone())
            .collect_vec()
    }

    /// Ask for `route` to be on the speaker. Returns true if this created
    /// speaker work.
    pub fn set_target(&mut self, route: Route, replaces: Option<RouteKey>) -> bool {
        let Some(entry) = self.routes.get_mut(&route.key) else {
            self.routes
                .insert(route.key, TrackedRoute::pending(route, replaces));
            return true;
        };

        entry.superseded_by = None;

        if !entry.in_doubt && entry.advertised.as_ref() == Some(&route) {
            // Already on the wire as requested; cancel any pending change.
            if entry.state != RouteState::Advertised {
                entry.enter(RouteState::Advertised);
            }
            entry.target = Some(route);
            entry.replaces = None;
            return false;
        }

        if entry.state == RouteState::Pending && entry.target.as_ref() == Some(&route) {
            if entry.replaces.is_none() {
                entry.replaces = replaces;
            }
            return false;
        }

        entry.enter(RouteState::Pending);
        entry.target = Some(route);
        if replaces.is_some() {
            entry.replaces = replaces;
        }
        true
    }

    /// Ask for `key` to leave the speaker. Returns true if a withdraw will
    /// be issued.
    pub fn mark_withdraw(&mut self, key: &RouteKey) -> bool {
        self.release_superseded(key);

        let Some(entry) = self.routes.get_mut(key) else {
            return false;
        };

        if !entry.may_be_on_wire {
            // Never announced, nothing to take back.
            self.routes.remove(key);
            return false;
        }

        if entry.state == RouteState::Withdrawing {
            entry.superseded_by = None;
        } else {
            entry.enter(RouteState::Withdrawing);
        }
        true
    }

    /// Hand the prefix of `old` over to `new`. Returns the key the announce
    /// of `new` replaces, if any is on the wire.
    pub fn supersede(&mut self, old: RouteKey, new: RouteKey) -> Option<RouteKey> {
        if old == new {
            return None;
        }

        let mut inherited = None;
        for (key, entry) in &mut self.routes {
            if entry.superseded_by == Some(old) {
                if *key == new {
                    entry.superseded_by = None;
                } else {
                    entry.superseded_by = Some(new);
                    inherited.get_or_insert(*key);
                }
            }
        }

        let replaced = match self.routes.get_mut(&old) {
            Some(entry) if entry.may_be_on_wire => {
                entry.enter(RouteState::Withdrawing);
                entry.superseded_by = Some(new);
                Some(old)
            }
            Some(_) => {
                self.routes.remove(&old);
                inherited
            }
            None => inherited,
        };

        // `new` may have lost the prefix to `old` on the speaker; push it
        // again so the replacement completes.
        if replaced.is_some() {
            if let Some(entry) = self.routes.get_mut(&new) {
                entry.in_doubt = true;
                if entry.state == RouteState::Advertised {
                    entry.enter(RouteState::Pending);
                    entry.replaces = replaced;
                }
            }
        }

        replaced
    }

    /// Tracked keys on `prefix`.
    #[must_use]
    pub fn keys_on(&self, prefix: Prefix) -> Vec<RouteKey> {
        self.routes
            .keys()
            .filter(|k| k.prefix == prefix)
            .copied()
            .collect_vec()
    }

    fn release_superseded(&mut self, key: &RouteKey) {
        for entry in self.routes.values_mut() {
            if entry.superseded_by.as_ref() == Some(key) {
                entry.superseded_by = None;
            }
        }
    }

    /// Calls to make at `now`, or ignoring backoff when `now` is `None`.
    #[must_use]
    pub fn due_work(&self, now: Option<Instant>) -> DueWork {
        let mut work = DueWork::default();
        for (key, entry) in &self.routes {
            if !entry.needs_call() {
                continue;
            }
            match (now, entry.retry.due) {
                (Some(now), Some(due)) if !entry.is_due(now) => work.deferred.push((*key, due)),
                _ if entry.state == RouteState::Pending => work.announces.push(*key),
                _ => work.withdraws.push(*key),
            }
        }
        work
    }

    /// Record a successful announce. Returns entries the announce replaced.
    ///
    /// The speaker now carries `key` on its prefix and nothing else there:
    /// other withdrawing entries on the prefix are dropped, and any other
    /// entry is marked off the wire.
    pub fn announce_succeeded(&mut self, key: &RouteKey) -> Vec<RouteKey> {
        let Some(entry) = self.routes.get_mut(key) else {
            return Vec::new();
        };
        entry.may_be_on_wire = true;
        entry.in_doubt = false;
        entry.advertised = entry.target.clone();
        entry.replaces = None;
        entry.enter(RouteState::Advertised);

        let mut replaced = Vec::new();
        for (other, entry) in &mut self.routes {
            if other.prefix != key.prefix || other == key {
                continue;
            }
            if entry.state == RouteState::Withdrawing || entry.superseded_by == Some(*key) {
                replaced.push(*other);
            } else {
                entry.may_be_on_wire = false;
                entry.in_doubt = false;
                entry.advertised = None;
            }
        }
        for old in &replaced {
            self.routes.remove(old);
        }
        replaced
    }

    /// Record a successful withdraw; the entry goes `Absent`.
    pub fn withdraw_succeeded(&mut self, key: &RouteKey) {
        self.routes.remove(key);
    }

    /// Record a failed call. Returns the consecutive failure count.
    pub fn call_failed(&mut self, key: &RouteKey, error: String, due: Instant) -> u32 {
        let Some(entry) = self.routes.get_mut(key) else {
            return 0;
        };
        entry.may_be_on_wire = true;
        entry.in_doubt = true;
        entry.retry.failures = entry.retry.failures.saturating_add(1);
        entry.retry.due = Some(due);
        entry.retry.last_error = Some(error);
        entry.retry.failures
    }

    /// Entries with at least `threshold` consecutive failures.
    pub fn failing(&self, threshold: u32) -> impl Iterator<Item = (&RouteKey, &TrackedRoute)> {
        self.routes
            .iter()
            .filter(move |(_, e)| e.retry.failures >= threshold)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use super::*;
    use corebgp_core::Announcement;

    fn route(prefix: &str, next_hop: &str) -> Route {
        Announcement::new("edge", "a", prefix.parse().unwrap(), next_hop.parse().unwrap()).route()
    }

    fn advertise(tracker: &mut RouteTracker, route: &Route) {
        tracker.set_target(route.clone(), None);
        tracker.announce_succeeded(&route.key);
    }

    #[test]
    fn test_new_target_is_pending() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        assert!(tracker.set_target(r.clone(), None));
        assert_eq!(tracker.get(&r.key).unwrap().state, RouteState::Pending);
        assert_eq!(tracker.due_work(None).announces, vec![r.key]);
    }

    #[test]
    fn test_same_target_on_advertised_is_noop() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        advertise(&mut tracker, &r);

        assert!(!tracker.set_target(r.clone(), None));
        assert!(tracker.get(&r.key).unwrap().is_confirmed());
        assert_eq!(tracker.due_work(None), DueWork::default());
    }

    #[test]
    fn test_attribute_change_goes_back_to_pending() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        advertise(&mut tracker, &r);

        let mut changed = r.clone();
        changed.attributes.as_path = vec![65001];
        assert!(tracker.set_target(changed, None));
        let entry = tracker.get(&r.key).unwrap();
        assert_eq!(entry.state, RouteState::Pending);
        assert_eq!(entry.advertised.as_ref(), Some(&r));
    }

    #[test]
    fn test_withdraw_of_unattempted_route_drops_it() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        tracker.set_target(r.clone(), None);

        assert!(!tracker.mark_withdraw(&r.key));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_withdraw_after_failed_announce_is_issued() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        tracker.set_target(r.clone(), None);
        tracker.call_failed(&r.key, "timeout".into(), Instant::now());

        assert!(tracker.mark_withdraw(&r.key));
        assert_eq!(tracker.get(&r.key).unwrap().state, RouteState::Withdrawing);
    }

    #[test]
    fn test_readvertise_before_withdraw_cancels_it() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        advertise(&mut tracker, &r);
        tracker.mark_withdraw(&r.key);

        assert!(!tracker.set_target(r.clone(), None));
        assert!(tracker.get(&r.key).unwrap().is_confirmed());
    }

    #[test]
    fn test_next_hop_change_supersedes_old_key() {
        let mut tracker = RouteTracker::new();
        let old = route("10.0.0.0/24", "192.0.2.1");
        let new = route("10.0.0.0/24", "192.0.2.2");
        advertise(&mut tracker, &old);

        let replaces = tracker.supersede(old.key, new.key);
        assert_eq!(replaces, Some(old.key));
        tracker.set_target(new.clone(), replaces);

        let work = tracker.due_work(None);
        assert_eq!(work.announces, vec![new.key]);
        assert!(work.withdraws.is_empty());

        assert_eq!(tracker.announce_succeeded(&new.key), vec![old.key]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_released_supersede_withdraws_old_key() {
        let mut tracker = RouteTracker::new();
        let old = route("10.0.0.0/24", "192.0.2.1");
        let new = route("10.0.0.0/24", "192.0.2.2");
        advertise(&mut tracker, &old);
        let replaces = tracker.supersede(old.key, new.key);
        tracker.set_target(new.clone(), replaces);

        // New route removed before its announce ran.
        tracker.mark_withdraw(&new.key);

        let work = tracker.due_work(None);
        assert!(work.announces.is_empty());
        assert_eq!(work.withdraws, vec![old.key]);
    }

    #[test]
    fn test_flip_flop_next_hop_restores_original() {
        let mut tracker = RouteTracker::new();
        let a = route("10.0.0.0/24", "192.0.2.1");
        let b = route("10.0.0.0/24", "192.0.2.2");
        advertise(&mut tracker, &a);

        let replaces = tracker.supersede(a.key, b.key);
        tracker.set_target(b.clone(), replaces);
        let replaces = tracker.supersede(b.key, a.key);
        tracker.set_target(a.clone(), replaces);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.get(&a.key).unwrap().is_confirmed());
        assert_eq!(tracker.due_work(None), DueWork::default());
    }

    #[test]
    fn test_announce_clears_other_keys_on_prefix() {
        let mut tracker = RouteTracker::new();
        let a = route("10.0.0.0/24", "192.0.2.1");
        let b = route("10.0.0.0/24", "192.0.2.2");
        let c = route("10.0.0.0/24", "192.0.2.3");
        advertise(&mut tracker, &a);
        tracker.set_target(c.clone(), None);
        tracker.call_failed(&c.key, "timeout".into(), Instant::now());
        tracker.mark_withdraw(&c.key);

        // b wins the prefix: a is superseded, c was withdrawing.
        let replaces = tracker.supersede(a.key, b.key);
        tracker.set_target(b.clone(), replaces);
        let replaced = tracker.announce_succeeded(&b.key);

        assert_eq!(replaced.len(), 2);
        assert_eq!(tracker.keys_on(b.prefix()), vec![b.key]);
        assert_eq!(tracker.count(RouteState::Advertised), 1);
    }

    #[test]
    fn test_survivor_reannounced_after_winner_leaves() {
        let mut tracker = RouteTracker::new();
        let a = route("10.0.0.0/24", "192.0.2.1");
        let b = route("10.0.0.0/24", "192.0.2.2");
        advertise(&mut tracker, &a);
        let replaces = tracker.supersede(a.key, b.key);
        tracker.set_target(b.clone(), replaces);
        tracker.announce_succeeded(&b.key);

        // b goes away and a claims the prefix again.
        let replaces = tracker.supersede(b.key, a.key);
        assert_eq!(replaces, Some(b.key));
        assert!(tracker.set_target(a.clone(), replaces));

        let work = tracker.due_work(None);
        assert_eq!(work.announces, vec![a.key]);
        assert!(work.withdraws.is_empty());
    }

    #[test]
    fn test_reclaim_after_failed_handover_reannounces() {
        let mut tracker = RouteTracker::new();
        let a = route("10.0.0.0/24", "192.0.2.1");
        let b = route("10.0.0.0/24", "192.0.2.2");
        advertise(&mut tracker, &a);
        let replaces = tracker.supersede(a.key, b.key);
        tracker.set_target(b.clone(), replaces);
        tracker.call_failed(&b.key, "timeout".into(), Instant::now());

        // b may hold the prefix, so a has to be pushed again.
        let replaces = tracker.supersede(b.key, a.key);
        assert_eq!(replaces, Some(b.key));
        assert!(tracker.set_target(a.clone(), replaces));

        let work = tracker.due_work(None);
        assert_eq!(work.announces, vec![a.key]);
        assert!(work.withdraws.is_empty());
        assert_eq!(tracker.announce_succeeded(&a.key), vec![b.key]);
        assert!(tracker.get(&a.key).unwrap().is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_is_deferred_until_due() {
        let mut tracker = RouteTracker::new();
        let r = route("10.0.0.0/24", "192.0.2.1");
        tracker.set_target(r.clone(), None);

        let due = Instant::now() + Duration::from_secs(1);
        assert_eq!(tracker.call_failed(&r.key, "boom".into(), due), 1);

        let work = tracker.due_work(Some(Instant::now()));
        assert!(work.announces.is_empty());
        assert_eq!(work.deferred, vec![(r.key, due)]);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(tracker.due_work(Some(Instant::now())).announces, vec![r.key]);
        assert_eq!(tracker.due_work(None).announces, vec![r.key]);
    }
}
