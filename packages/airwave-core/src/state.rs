//! Core application configuration types.
//!
//! Provides the runtime configuration ([`Config`], [`StreamingConfig`]) that
//! the engine, fetchers and HTTP layer consume. Loading from disk and
//! environment lives in the server binary; this module only validates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for audio distribution behavior.
///
/// Groups the parameters that control per-listener buffering.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamingConfig {
    /// Capacity (in chunks) of each listener sink channel.
    ///
    /// A sink whose channel fills up is considered irrecoverably slow and
    /// is detached, so this bounds per-listener memory.
    pub sink_capacity: usize,
}

impl StreamingConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sink_capacity == 0 {
            return Err("sink_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        Ok(())
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { sink_capacity: 512 }
    }
}

/// Configuration for the Airwave broadcast service.
///
/// All fields have sensible defaults; the service runs with every field at
/// its default, with SoundCloud support disabled until a client id is set.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    // Sources
    /// SoundCloud API client id. When absent, SoundCloud URLs are rejected
    /// with a feature-disabled error.
    pub soundcloud_client_id: Option<String>,

    /// Raw YouTube cookie header value (`key=value; key2=value2`).
    /// Applied to in-process requests and materialized as a Netscape cookie
    /// file for the external fetcher.
    pub youtube_cookie: Option<String>,

    /// Path to an existing Netscape-format cookie file for YouTube.
    /// Takes precedence over `youtube_cookie` for the external fetcher.
    pub youtube_cookie_file: Option<PathBuf>,

    /// User-Agent header added to YouTube HTTP requests.
    pub youtube_user_agent: Option<String>,

    /// Format selector passed to the external fetcher subprocess.
    /// Defaults to preferring non-HLS direct audio.
    pub external_fetcher_format: Option<String>,

    /// Never spawn the external fetcher subprocess.
    pub disable_external_fetcher: bool,

    /// Skip the in-process client and go straight to the subprocess.
    pub external_fetcher_first: bool,

    // Access policy
    /// User ids allowed to mutate the queue. Empty list = open access.
    pub allowed_ids: Vec<String>,

    /// User ids with admin privileges.
    pub admin_ids: Vec<String>,

    // HTTP
    /// Origin of the web client, used for CORS. Absent = same-origin only.
    pub client_origin: Option<String>,

    // Streaming
    /// Listener distribution configuration.
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl Config {
    /// Validates the configuration, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        self.streaming.validate()?;
        if self.disable_external_fetcher && self.external_fetcher_first {
            return Err(
                "disable_external_fetcher and external_fetcher_first are mutually exclusive"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Returns true when SoundCloud URLs can be resolved.
    pub fn soundcloud_enabled(&self) -> bool {
        self.soundcloud_client_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_sink_capacity_rejected() {
        let config = Config {
            streaming: StreamingConfig { sink_capacity: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn conflicting_fetcher_flags_rejected() {
        let config = Config {
            disable_external_fetcher: true,
            external_fetcher_first: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn soundcloud_disabled_without_client_id() {
        assert!(!Config::default().soundcloud_enabled());
        let config = Config {
            soundcloud_client_id: Some("abc123".into()),
            ..Default::default()
        };
        assert!(config.soundcloud_enabled());
    }
}
