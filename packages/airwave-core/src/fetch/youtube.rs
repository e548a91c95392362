//! In-process YouTube client.
//!
//! Resolves a video through the innertube player API using the Android
//! client surface, which returns directly fetchable audio format URLs, then
//! streams the chosen format over the shared HTTP client. This is the fast
//! path; HLS-only and gated videos fall through to the external fetcher.

use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::fetch::normalize::youtube_video_id;
use crate::fetch::{AudioInput, FetchError};
use crate::state::Config;
use crate::track::TrackMeta;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";

/// Client surface presented to innertube. The Android client receives
/// direct (non-ciphered) stream URLs.
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_VERSION: &str = "19.44.38";
const ANDROID_SDK_VERSION: u32 = 34;
const DEFAULT_USER_AGENT: &str =
    "com.google.android.youtube/19.44.38 (Linux; U; Android 14) gzip";

/// Preferred audio itag: 128 kbps AAC, present on nearly every video.
const PREFERRED_AUDIO_ITAG: u32 = 140;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: PlayabilityStatus,
    streaming_data: Option<StreamingData>,
    video_details: Option<VideoDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFormat {
    itag: u32,
    url: Option<String>,
    mime_type: String,
    bitrate: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    title: String,
    length_seconds: Option<String>,
    thumbnail: Option<ThumbnailSet>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailSet {
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: Option<u32>,
}

fn user_agent(config: &Config) -> &str {
    config
        .youtube_user_agent
        .as_deref()
        .unwrap_or(DEFAULT_USER_AGENT)
}

async fn player(
    http: &reqwest::Client,
    config: &Config,
    video_id: &str,
) -> Result<PlayerResponse, FetchError> {
    let body = json!({
        "context": {
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
                "androidSdkVersion": ANDROID_SDK_VERSION,
                "userAgent": user_agent(config),
                "hl": "en",
            }
        },
        "videoId": video_id,
        "contentCheckOk": true,
        "racyCheckOk": true,
    });

    let mut request = http
        .post(PLAYER_ENDPOINT)
        .header(reqwest::header::USER_AGENT, user_agent(config))
        .json(&body);
    if let Some(cookie) = &config.youtube_cookie {
        request = request.header(reqwest::header::COOKIE, cookie.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Upstream(format!("player request failed: {e}")))?
        .error_for_status()
        .map_err(|e| FetchError::Upstream(format!("player request rejected: {e}")))?;

    let player: PlayerResponse = response
        .json()
        .await
        .map_err(|e| FetchError::Upstream(format!("player response unreadable: {e}")))?;

    if player.playability_status.status != "OK" {
        let reason = player
            .playability_status
            .reason
            .unwrap_or_else(|| player.playability_status.status.clone());
        return Err(FetchError::Upstream(format!("video not playable: {reason}")));
    }
    Ok(player)
}

/// Picks the best directly fetchable audio-only format.
fn pick_audio_format(formats: &[StreamFormat]) -> Option<&StreamFormat> {
    let audio: Vec<&StreamFormat> = formats
        .iter()
        .filter(|f| f.mime_type.starts_with("audio/") && f.url.is_some())
        .collect();

    audio
        .iter()
        .find(|f| f.itag == PREFERRED_AUDIO_ITAG)
        .copied()
        .or_else(|| audio.into_iter().max_by_key(|f| f.bitrate.unwrap_or(0)))
}

/// Resolves and opens the audio stream for a YouTube URL.
pub async fn fetch_stream(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<AudioInput, FetchError> {
    let video_id = youtube_video_id(url)
        .ok_or_else(|| FetchError::Unsupported(format!("not a recognized video URL: {url}")))?;

    let player = player(http, config, &video_id).await?;
    let streaming = player
        .streaming_data
        .ok_or_else(|| FetchError::Upstream("player response carried no stream data".into()))?;
    let format = pick_audio_format(&streaming.adaptive_formats)
        .ok_or_else(|| FetchError::Upstream("no direct audio format available".into()))?;
    let stream_url = format
        .url
        .as_deref()
        .ok_or_else(|| FetchError::Upstream("chosen format lost its URL".into()))?;

    log::debug!(
        "[Fetch] YouTube {} -> itag {} ({})",
        video_id,
        format.itag,
        format.mime_type
    );

    let mut request = http
        .get(stream_url)
        .header(reqwest::header::USER_AGENT, user_agent(config));
    if let Some(cookie) = &config.youtube_cookie {
        request = request.header(reqwest::header::COOKIE, cookie.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Upstream(format!("audio stream request failed: {e}")))?
        .error_for_status()
        .map_err(|e| FetchError::Upstream(format!("audio stream rejected: {e}")))?;

    let stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    Ok(AudioInput::Stream(Box::pin(stream)))
}

/// Resolves title, duration and thumbnail for a YouTube URL.
pub async fn metadata(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<TrackMeta, FetchError> {
    let video_id = youtube_video_id(url)
        .ok_or_else(|| FetchError::Unsupported(format!("not a recognized video URL: {url}")))?;
    let player = player(http, config, &video_id).await?;
    let details = player
        .video_details
        .ok_or_else(|| FetchError::Upstream("player response carried no video details".into()))?;

    let thumbnail = details.thumbnail.and_then(|set| {
        set.thumbnails
            .into_iter()
            .max_by_key(|t| t.width.unwrap_or(0))
            .map(|t| t.url)
    });
    let duration = details
        .length_seconds
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|&d| d > 0);

    Ok(TrackMeta {
        title: details.title,
        duration,
        thumbnail,
    })
}
