//! Change events produced by a watch session.

use crate::model::{Announcement, AnnouncementKey, Revision};

/// A change observed on the announcement store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An announcement was created.
    Added {
        announcement: Announcement,
        revision: Revision,
    },
    /// An existing announcement changed.
    Modified {
        announcement: Announcement,
        revision: Revision,
    },
    /// An announcement was removed. Carries its last known contents.
    Deleted {
        announcement: Announcement,
        revision: Revision,
    },
    /// Full state listed at `revision`; supersedes everything seen before.
    Resynced {
        announcements: Vec<Announcement>,
        revision: Revision,
    },
    /// The watch stream broke or the store reported an error.
    Error { reason: String },
}

impl WatchEvent {
    /// Added event at the announcement's own revision.
    #[must_use]
    pub fn added(announcement: Announcement) -> Self {
        let revision = announcement.revision;
        Self::Added {
            announcement,
            revision,
        }
    }

    /// Modified event at the announcement's own revision.
    #[must_use]
    pub fn modified(announcement: Announcement) -> Self {
        let revision = announcement.revision;
        Self::Modified {
            announcement,
            revision,
        }
    }

    /// Deleted event at the given revision.
    #[must_use]
    pub const fn deleted(announcement: Announcement, revision: Revision) -> Self {
        Self::Deleted {
            announcement,
            revision,
        }
    }

    #[must_use]
    pub const fn resynced(announcements: Vec<Announcement>, revision: Revision) -> Self {
        Self::Resynced {
            announcements,
            revision,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Modified { .. } => "modified",
            Self::Deleted { .. } => "deleted",
            Self::Resynced { .. } => "resynced",
            Self::Error { .. } => "error",
        }
    }

    /// Store revision the event happened at, if any.
    #[must_use]
    pub const fn revision(&self) -> Option<Revision> {
        match self {
            Self::Added { revision, .. }
            | Self::Modified { revision, .. }
            | Self::Deleted { revision, .. }
            | Self::Resynced { revision, .. } => Some(*revision),
            Self::Error { .. } => None,
        }
    }

    /// Key of the single announcement this event concerns.
    #[must_use]
    pub fn key(&self) -> Option<AnnouncementKey> {
        match self {
            Self::Added { announcement, .. }
            | Self::Modified { announcement, .. }
            | Self::Deleted { announcement, .. } => Some(announcement.key()),
            Self::Resynced { .. } | Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_event_accessors() {
        let announcement = Announcement::new(
            "edge",
            "a",
            "10.0.0.0/24".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
        )
        .with_revision(Revision::new(3));

        let event = WatchEvent::added(announcement.clone());
        assert_eq!(event.kind(), "added");
        assert_eq!(event.revision(), Some(Revision::new(3)));
        assert_eq!(event.key(), Some(AnnouncementKey::new("edge", "a")));

        let resync = WatchEvent::resynced(vec![announcement], Revision::new(9));
        assert_eq!(resync.revision(), Some(Revision::new(9)));
        assert!(resync.key().is_none());

        assert!(WatchEvent::error("closed").revision().is_none());
    }
}
