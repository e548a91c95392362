//! Source fetchers: turn a queued track into an [`AudioInput`].
//!
//! Each source has a primary strategy and a fallback, each guarded by a
//! startup timeout. A fetcher counts as started once the first audio byte is
//! available (or, for resolver-style strategies, once the resolved stream
//! endpoint has answered); exceeding the timeout destroys the stream or
//! kills the subprocess and surfaces a fetch failure to the engine.

pub mod cookies;
pub mod external;
pub mod generic;
pub mod normalize;
pub mod soundcloud;
pub mod youtube;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::protocol_constants::{
    EXTERNAL_FETCH_TIMEOUT_SECS, GENERIC_FETCH_MAX_REDIRECTS, GENERIC_FETCH_TIMEOUT_SECS,
    INPROCESS_FETCH_TIMEOUT_SECS,
};
use crate::state::Config;
use crate::track::{Track, TrackSource};

/// Boxed stream of raw compressed audio bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// The input handed to the encoder pipeline.
///
/// Two shapes exist because some sources hand us bytes directly (the encoder
/// consumes them from its input pipe) while others resolve to a URL that the
/// encoder opens itself, which is required for HLS playlists.
pub enum AudioInput {
    /// A readable byte stream of raw compressed audio.
    Stream(ByteStream),
    /// A URL plus request headers for the encoder to open.
    Remote {
        url: String,
        headers: Vec<(String, String)>,
        /// HLS inputs additionally enable the encoder's protocol allowlist.
        hls: bool,
    },
}

impl std::fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("AudioInput::Stream"),
            Self::Remote { url, hls, .. } => f
                .debug_struct("AudioInput::Remote")
                .field("url", url)
                .field("hls", hls)
                .finish(),
        }
    }
}

/// Errors raised while resolving a track to an audio input.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is neither a recognized video nor a recognized single track.
    #[error("unsupported URL: {0}")]
    Unsupported(String),

    /// The fetcher did not start within its startup timeout.
    #[error("fetch startup exceeded {0:?}")]
    Timeout(Duration),

    /// The upstream service answered with an error or an unusable payload.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// Local I/O failure while wiring up the stream.
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam between the engine and the source-resolution machinery.
///
/// The engine only ever calls `fetch`; tests substitute a stub.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolves a track to an audio input, applying the per-source
    /// primary/fallback policy and startup timeouts.
    async fn fetch(&self, track: &Track) -> Result<AudioInput, FetchError>;
}

/// Production fetcher implementing the per-source resolution policy.
pub struct SourceFetcher {
    http: reqwest::Client,
    config: Arc<Config>,
}

impl SourceFetcher {
    /// Creates a fetcher with a shared HTTP client for the resolver-style
    /// strategies (YouTube, SoundCloud).
    ///
    /// The client caps redirects and bounds connection establishment; body
    /// streaming is never time-limited here (tracks play for minutes). The
    /// generic fallback uses its own redirect-by-hand client so its timeout
    /// applies per hop.
    pub fn new(config: Arc<Config>) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(
                GENERIC_FETCH_MAX_REDIRECTS,
            ))
            .connect_timeout(Duration::from_secs(GENERIC_FETCH_TIMEOUT_SECS))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { http, config }
    }

    async fn fetch_youtube(&self, track: &Track) -> Result<AudioInput, FetchError> {
        let inprocess_timeout = Duration::from_secs(INPROCESS_FETCH_TIMEOUT_SECS);
        let external_timeout = Duration::from_secs(EXTERNAL_FETCH_TIMEOUT_SECS);

        if self.config.external_fetcher_first {
            return external::fetch_stream(&self.config, &track.url, external_timeout).await;
        }

        let inprocess = tokio::time::timeout(
            inprocess_timeout,
            youtube::fetch_stream(&self.http, &self.config, &track.url),
        )
        .await
        .unwrap_or(Err(FetchError::Timeout(inprocess_timeout)));

        match inprocess {
            Ok(input) => Ok(input),
            Err(FetchError::Unsupported(msg)) => Err(FetchError::Unsupported(msg)),
            Err(e) if self.config.disable_external_fetcher => Err(e),
            Err(e) => {
                log::warn!(
                    "[Fetch] In-process client failed for {} ({e}), falling back to subprocess",
                    track.url
                );
                external::fetch_stream(&self.config, &track.url, external_timeout).await
            }
        }
    }

    async fn fetch_soundcloud(&self, track: &Track) -> Result<AudioInput, FetchError> {
        match soundcloud::fetch_stream(&self.http, &self.config, &track.url).await {
            Ok(input) => Ok(input),
            Err(FetchError::Unsupported(msg)) => Err(FetchError::Unsupported(msg)),
            Err(e) => {
                log::warn!(
                    "[Fetch] SoundCloud resolution failed for {} ({e}), trying generic fetch",
                    track.url
                );
                generic::fetch_stream(&track.url).await
            }
        }
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, track: &Track) -> Result<AudioInput, FetchError> {
        log::debug!("[Fetch] Resolving {} track {}", track.source, track.url);
        match track.source {
            TrackSource::Youtube => self.fetch_youtube(track).await,
            TrackSource::Soundcloud => self.fetch_soundcloud(track).await,
        }
    }
}
