//! Generic HTTP audio fetcher.
//!
//! Last-resort fallback for direct audio URLs. Redirects are followed by
//! hand so the timeout applies to each hop rather than the whole chain:
//! at most 5 redirects, each hop given 10 s to answer its headers, and the
//! final answer must be 2xx with an audio-ish content type.

use std::sync::OnceLock;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header;
use url::Url;

use crate::fetch::{AudioInput, FetchError};
use crate::protocol_constants::{GENERIC_FETCH_MAX_REDIRECTS, GENERIC_FETCH_TIMEOUT_SECS};

/// Client with automatic redirects disabled; the hop loop follows them so
/// every hop gets its own deadline.
fn hop_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(GENERIC_FETCH_TIMEOUT_SECS))
            .build()
            .expect("reqwest client construction cannot fail with static options")
    })
}

/// Content types accepted as raw audio.
fn is_audio_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or("").trim();
    essence.starts_with("audio/") || essence == "application/octet-stream"
}

/// Resolves a Location header against the URL that answered with it.
fn resolve_location(base: &str, location: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

/// Opens a plain HTTP audio stream.
///
/// Each hop's header exchange must complete within the per-hop timeout;
/// body streaming is unbounded (tracks play for minutes).
pub async fn fetch_stream(url: &str) -> Result<AudioInput, FetchError> {
    let deadline = Duration::from_secs(GENERIC_FETCH_TIMEOUT_SECS);
    let mut url = url.to_string();

    // Initial request plus up to the redirect budget.
    for _ in 0..=GENERIC_FETCH_MAX_REDIRECTS {
        let response = tokio::time::timeout(deadline, hop_client().get(&url).send())
            .await
            .map_err(|_| FetchError::Timeout(deadline))?
            .map_err(|e| FetchError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| resolve_location(&url, loc))
                .ok_or_else(|| {
                    FetchError::Upstream(format!("redirect {status} without a usable location"))
                })?;
            log::debug!("[Fetch] Following redirect to {location}");
            url = location;
            continue;
        }
        if !status.is_success() {
            return Err(FetchError::Upstream(format!("upstream answered {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !is_audio_content_type(content_type) {
            return Err(FetchError::Upstream(format!(
                "not an audio response (content-type: {content_type})"
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        return Ok(AudioInput::Stream(Box::pin(stream)));
    }

    Err(FetchError::Upstream(format!(
        "more than {GENERIC_FETCH_MAX_REDIRECTS} redirects"
    )))
}
