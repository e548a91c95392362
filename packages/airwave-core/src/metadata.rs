//! Track metadata resolution at enqueue time.
//!
//! A URL must resolve to a title before it enters the queue; duration and
//! thumbnail are best-effort. Resolution failure surfaces to the caller as
//! an HTTP error and no partial track is enqueued.

use serde::Deserialize;

use crate::error::{AirwaveError, AirwaveResult};
use crate::fetch::{soundcloud, youtube};
use crate::state::Config;
use crate::track::{TrackMeta, TrackSource};

const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

#[derive(Debug, Deserialize)]
struct OembedResponse {
    title: String,
    thumbnail_url: Option<String>,
}

/// Lightweight fallback lookup when the player API is unavailable.
/// oEmbed carries no duration, which the data model tolerates.
async fn youtube_oembed(http: &reqwest::Client, url: &str) -> AirwaveResult<TrackMeta> {
    let response: OembedResponse = http
        .get(OEMBED_ENDPOINT)
        .query(&[("url", url), ("format", "json")])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| AirwaveError::Upstream(format!("oEmbed lookup rejected: {e}")))?
        .json()
        .await
        .map_err(|e| AirwaveError::Upstream(format!("oEmbed response unreadable: {e}")))?;

    Ok(TrackMeta {
        title: response.title,
        duration: None,
        thumbnail: response.thumbnail_url,
    })
}

/// Resolves title, duration and thumbnail for a normalized URL.
pub async fn resolve(
    http: &reqwest::Client,
    config: &Config,
    source: TrackSource,
    url: &str,
) -> AirwaveResult<TrackMeta> {
    match source {
        TrackSource::Youtube => match youtube::metadata(http, config, url).await {
            Ok(meta) => Ok(meta),
            Err(e) => {
                log::debug!("[Metadata] Player lookup failed for {url} ({e}), trying oEmbed");
                youtube_oembed(http, url).await
            }
        },
        TrackSource::Soundcloud => soundcloud::metadata(http, config, url)
            .await
            .map_err(Into::into),
    }
}
