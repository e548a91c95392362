//! Track data model and wire shapes.
//!
//! A [`Track`] is immutable after enqueue with one exception: `started_at`
//! is stamped exactly once by the engine at the instant the track's first
//! MP3 chunk is emitted. The pause-adjusted copy served by snapshots is
//! produced transiently and never stored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audio source a track was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Youtube,
    Soundcloud,
}

impl TrackSource {
    /// Returns the source as a short string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Soundcloud => "soundcloud",
        }
    }
}

impl std::fmt::Display for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user who submitted a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Metadata resolved for a URL before it enters the queue.
#[derive(Debug, Clone)]
pub struct TrackMeta {
    pub title: String,
    /// Best-effort duration in seconds.
    pub duration: Option<u32>,
    /// Best-effort thumbnail URL.
    pub thumbnail: Option<String>,
}

/// A queued or playing audio item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    /// Normalized source URL (YouTube timestamps stripped at enqueue).
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Duration in seconds, when the source reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Wall-clock start timestamp (ms since epoch). Present only on the
    /// currently playing track, stamped at first emitted chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    pub source: TrackSource,
    pub requested_by: Requester,
}

impl Track {
    /// Builds a track from resolved metadata with a fresh id.
    pub fn new(source: TrackSource, url: String, meta: TrackMeta, requested_by: Requester) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: meta.title,
            url,
            thumbnail: meta.thumbnail,
            duration: meta.duration,
            started_at: None,
            source,
            requested_by,
        }
    }
}
