//! Desired state: the announcements the store says should be live.

use std::collections::BTreeMap;

use corebgp_core::{Announcement, AnnouncementKey, Prefix, Revision, Route};

/// Result of applying an Added/Modified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// Revision not newer than what is known for the key.
    Stale,
    /// Accepted; carries the record it superseded, if any.
    Applied { previous: Option<Announcement> },
}

/// Result of applying a Deleted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Revision not newer than what is known for the key.
    Stale,
    /// The key was live and is now gone.
    Removed(Announcement),
    /// Nothing was stored; a tombstone was still recorded.
    Absent,
}

/// Announcements by store key, with tombstones for keys deleted since the
/// last resync.
#[derive(Debug, Clone, Default)]
pub struct DesiredState {
    entries: BTreeMap<AnnouncementKey, (Announcement, Revision)>,
    tombstones: BTreeMap<AnnouncementKey, Revision>,
    /// Revision of the last resync. Anything at or below it is already
    /// reflected in `entries`.
    floor: Revision,
}

impl DesiredState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest revision known for `key`, live or deleted.
    #[must_use]
    pub fn known_revision(&self, key: &AnnouncementKey) -> Revision {
        let live = self.entries.get(key).map(|(_, r)| *r);
        let dead = self.tombstones.get(key).copied();
        live.into_iter()
            .chain(dead)
            .chain(std::iter::once(self.floor))
            .max()
            .unwrap_or(Revision::ZERO)
    }

    fn is_stale(&self, key: &AnnouncementKey, revision: Revision) -> bool {
        revision <= self.known_revision(key)
    }

    /// Insert or replace the record for the announcement's key.
    pub fn upsert(&mut self, announcement: Announcement, revision: Revision) -> Upsert {
        let key = announcement.key();
        if self.is_stale(&key, revision) {
            return Upsert::Stale;
        }
        self.tombstones.remove(&key);
        let previous = self
            .entries
            .insert(key, (announcement, revision))
            .map(|(a, _)| a);
        Upsert::Applied { previous }
    }

    /// Remove `key` as of `revision`.
    pub fn remove(&mut self, key: &AnnouncementKey, revision: Revision) -> Removal {
        if self.is_stale(key, revision) {
            return Removal::Stale;
        }
        self.tombstones.insert(key.clone(), revision);
        match self.entries.remove(key) {
            Some((announcement, _)) => Removal::Removed(announcement),
            None => Removal::Absent,
        }
    }

    /// Replace everything with a full listing taken at `revision`.
    pub fn replace(&mut self, announcements: Vec<Announcement>, revision: Revision) {
        self.tombstones.clear();
        self.floor = revision;
        self.entries = announcements
            .into_iter()
            .map(|a| {
                let rev = a.revision;
                (a.key(), (a, rev))
            })
            .collect();
    }

    #[must_use]
    pub fn get(&self, key: &AnnouncementKey) -> Option<&Announcement> {
        self.entries.get(key).map(|(a, _)| a)
    }

    /// Routes the speaker should carry, in key order.
    pub fn routes(&self) -> impl Iterator<Item = Route> + '_ {
        self.entries.values().map(|(a, _)| a.route())
    }

    /// Route the speaker should carry for `prefix`.
    ///
    /// The speaker holds one path per prefix, so when several announcements
    /// claim a prefix the newest revision wins, ties going to the greatest
    /// key.
    #[must_use]
    pub fn winner(&self, prefix: Prefix) -> Option<Route> {
        self.entries
            .iter()
            .filter(|(_, (a, _))| a.prefix == prefix)
            .max_by(|(ka, (_, ra)), (kb, (_, rb))| (ra, ka).cmp(&(rb, kb)))
            .map(|(_, (a, _))| a.route())
    }

    /// The winning route of every claimed prefix.
    #[must_use]
    pub fn winners(&self) -> BTreeMap<Prefix, Route> {
        let mut best: BTreeMap<Prefix, (Revision, &AnnouncementKey, &Announcement)> =
            BTreeMap::new();
        for (key, (announcement, revision)) in &self.entries {
            let wins = best
                .get(&announcement.prefix)
                .map_or(true, |(r, k, _)| (*revision, key) > (*r, *k));
            if wins {
                best.insert(announcement.prefix, (*revision, key, announcement));
            }
        }
        best.into_iter()
            .map(|(prefix, (_, _, announcement))| (prefix, announcement.route()))
            .collect()
    }

    /// Revision of the last resync.
    #[must_use]
    pub const fn floor(&self) -> Revision {
        self.floor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
}
