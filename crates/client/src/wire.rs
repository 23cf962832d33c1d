//! JSON shapes exchanged with the API server.

use corebgp_core::{Announcement, Revision, WatchEvent};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Body of `GET /v1/announcements/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub revision: Revision,
    #[serde(default)]
    pub announcements: Vec<Announcement>,
}

/// Body returned by create and update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MutationResponse {
    pub revision: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FrameType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One text frame on the watch socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatchFrame {
    #[serde(rename = "type")]
    kind: FrameType,
    #[serde(default)]
    revision: Revision,
    #[serde(default)]
    announcement: Option<Announcement>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode a watch frame into an event.
///
/// A frame without an explicit revision falls back to the announcement's own.
///
/// # Errors
///
/// Returns `Error::Decode` for malformed JSON or a missing announcement. An
/// announcement that parses but fails validation is passed through for the
/// reconciler to reject.
pub fn decode_frame(text: &str) -> Result<WatchEvent> {
    let frame: WatchFrame = serde_json::from_str(text)
        .map_err(|e| Error::decode(format!("malformed watch frame: {e}")))?;

    if frame.kind == FrameType::Error {
        return Ok(WatchEvent::error(
            frame
                .message
                .unwrap_or_else(|| "store reported an error".to_string()),
        ));
    }

    let mut announcement = frame
        .announcement
        .ok_or_else(|| Error::decode("watch frame without announcement"))?;

    let revision = if frame.revision == Revision::ZERO {
        announcement.revision
    } else {
        frame.revision
    };
    announcement.revision = revision;

    Ok(match frame.kind {
        FrameType::Added => WatchEvent::added(announcement),
        FrameType::Modified => WatchEvent::modified(announcement),
        FrameType::Deleted | FrameType::Error => WatchEvent::deleted(announcement, revision),
    })
}
