//! SoundCloud track resolution.
//!
//! Resolves a public track URL through the api-v2 resolve endpoint, then
//! exchanges the chosen transcoding for a time-limited stream URL that the
//! encoder opens itself. Only single tracks with a known duration are
//! accepted; playlists are rejected.

use serde::Deserialize;

use crate::fetch::{AudioInput, FetchError};
use crate::state::Config;
use crate::track::TrackMeta;

const RESOLVE_ENDPOINT: &str = "https://api-v2.soundcloud.com/resolve";

#[derive(Debug, Deserialize)]
pub(crate) struct ResolvedTrack {
    kind: String,
    title: Option<String>,
    /// Duration in milliseconds.
    duration: Option<u64>,
    artwork_url: Option<String>,
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(default)]
    transcodings: Vec<Transcoding>,
}

#[derive(Debug, Deserialize)]
struct Transcoding {
    url: String,
    format: TranscodingFormat,
}

#[derive(Debug, Deserialize)]
struct TranscodingFormat {
    protocol: String,
}

#[derive(Debug, Deserialize)]
struct StreamLocation {
    url: String,
}

fn client_id(config: &Config) -> Result<&str, FetchError> {
    config
        .soundcloud_client_id
        .as_deref()
        .ok_or_else(|| FetchError::Unsupported("SoundCloud support is not configured".into()))
}

async fn resolve(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<ResolvedTrack, FetchError> {
    let response = http
        .get(RESOLVE_ENDPOINT)
        .query(&[("url", url), ("client_id", client_id(config)?)])
        .send()
        .await
        .map_err(|e| FetchError::Upstream(format!("resolve request failed: {e}")))?
        .error_for_status()
        .map_err(|e| FetchError::Upstream(format!("resolve rejected: {e}")))?;

    response
        .json()
        .await
        .map_err(|e| FetchError::Upstream(format!("resolve response unreadable: {e}")))
}

/// Validates a resolved payload as a playable single track.
fn require_track(resolved: &ResolvedTrack) -> Result<(), FetchError> {
    if resolved.kind != "track" {
        return Err(FetchError::Unsupported(format!(
            "only single tracks are supported, got a {}",
            resolved.kind
        )));
    }
    if resolved.duration.unwrap_or(0) == 0 {
        return Err(FetchError::Unsupported(
            "track has no known duration".into(),
        ));
    }
    Ok(())
}

/// Resolves and opens the audio stream for a SoundCloud URL.
///
/// Returns a remote input: the stream URL is time-limited and the encoder
/// opens it directly (HLS transcodings need the encoder's protocol allowlist).
pub async fn fetch_stream(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<AudioInput, FetchError> {
    let resolved = resolve(http, config, url).await?;
    require_track(&resolved)?;

    let transcodings = resolved
        .media
        .as_ref()
        .map(|m| m.transcodings.as_slice())
        .unwrap_or_default();
    let chosen = transcodings
        .iter()
        .find(|t| t.format.protocol == "progressive")
        .or_else(|| transcodings.iter().find(|t| t.format.protocol == "hls"))
        .ok_or_else(|| FetchError::Upstream("no streamable transcoding".into()))?;

    let location: StreamLocation = http
        .get(&chosen.url)
        .query(&[("client_id", client_id(config)?)])
        .send()
        .await
        .map_err(|e| FetchError::Upstream(format!("transcoding request failed: {e}")))?
        .error_for_status()
        .map_err(|e| FetchError::Upstream(format!("transcoding rejected: {e}")))?
        .json()
        .await
        .map_err(|e| FetchError::Upstream(format!("transcoding response unreadable: {e}")))?;

    log::debug!(
        "[Fetch] SoundCloud {} -> {} stream",
        url,
        chosen.format.protocol
    );

    Ok(AudioInput::Remote {
        url: location.url,
        headers: Vec::new(),
        hls: chosen.format.protocol == "hls",
    })
}

/// Resolves title, duration and artwork for a SoundCloud URL.
pub async fn metadata(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<TrackMeta, FetchError> {
    let resolved = resolve(http, config, url).await?;
    require_track(&resolved)?;

    let title = resolved
        .title
        .clone()
        .ok_or_else(|| FetchError::Upstream("track has no title".into()))?;
    // The t500x500 rendition exists for every artwork the -large one does.
    let thumbnail = resolved
        .artwork_url
        .as_ref()
        .map(|u| u.replace("-large", "-t500x500"));
    let duration = resolved
        .duration
        .map(|ms| ms.div_ceil(1000) as u32)
        .filter(|&d| d > 0);

    Ok(TrackMeta {
        title,
        duration,
        thumbnail,
    })
}
