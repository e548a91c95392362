//! URL classification and normalization.
//!
//! Playback always begins at 0, so timestamp parameters are stripped from
//! YouTube URLs before they enter the queue. Non-YouTube URLs pass through
//! unchanged.

use url::Url;

use crate::track::TrackSource;

/// Query parameters that encode a start position.
const TIMESTAMP_PARAMS: [&str; 4] = ["t", "start", "time_continue", "timestamp"];

/// YouTube hosts subject to normalization.
const YOUTUBE_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "music.youtube.com",
    "m.youtube.com",
    "youtu.be",
];

const SOUNDCLOUD_HOSTS: [&str; 4] = [
    "soundcloud.com",
    "www.soundcloud.com",
    "m.soundcloud.com",
    "on.soundcloud.com",
];

fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Classifies a URL by source. Returns `None` for unrecognized hosts.
pub fn classify(raw: &str) -> Option<TrackSource> {
    let host = host_of(raw)?;
    if YOUTUBE_HOSTS.contains(&host.as_str()) {
        Some(TrackSource::Youtube)
    } else if SOUNDCLOUD_HOSTS.contains(&host.as_str()) {
        Some(TrackSource::Soundcloud)
    } else {
        None
    }
}

/// Strips timestamp query parameters and timestamp fragments from YouTube URLs.
///
/// Applied at enqueue time. URLs that fail to parse, or whose host is not a
/// YouTube host, are returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let is_youtube = url
        .host_str()
        .map(|h| YOUTUBE_HOSTS.contains(&h.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !is_youtube {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TIMESTAMP_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept).finish();
    }

    if let Some(fragment) = url.fragment() {
        if fragment.starts_with("t=") || fragment.starts_with("time_continue=") {
            url.set_fragment(None);
        }
    }

    url.to_string()
}

/// Extracts the video id from a YouTube URL, if present.
pub fn youtube_video_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host == "youtu.be" {
        return url
            .path_segments()
            .and_then(|mut s| s.next())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
    }
    if !YOUTUBE_HOSTS.contains(&host.as_str()) {
        return None;
    }
    // /watch?v=ID on all youtube.com hosts
    if let Some(id) = url
        .query_pairs()
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())
    {
        return Some(id);
    }
    // /shorts/ID and /live/ID
    let mut segments = url.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("shorts") | Some("live"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}
