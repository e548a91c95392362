//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `AIRWAVE_BIND_PORT`
    pub bind_port: u16,

    /// SoundCloud API client id; absent disables SoundCloud submissions.
    /// Override: `AIRWAVE_SOUNDCLOUD_CLIENT_ID`
    pub soundcloud_client_id: Option<String>,

    /// Raw YouTube cookie header value.
    /// Override: `AIRWAVE_YOUTUBE_COOKIE`
    pub youtube_cookie: Option<String>,

    /// Path to an existing Netscape-format YouTube cookie file.
    /// Override: `AIRWAVE_YOUTUBE_COOKIE_FILE`
    pub youtube_cookie_file: Option<PathBuf>,

    /// User-Agent for YouTube HTTP requests.
    pub youtube_user_agent: Option<String>,

    /// Format selector for the external fetcher subprocess.
    pub external_fetcher_format: Option<String>,

    /// Never spawn the external fetcher subprocess.
    pub disable_external_fetcher: bool,

    /// Skip the in-process client and go straight to the subprocess.
    pub external_fetcher_first: bool,

    /// User ids allowed to mutate the queue. Empty = open access.
    pub allowed_ids: Vec<String>,

    /// User ids with admin privileges.
    pub admin_ids: Vec<String>,

    /// Origin of the web client, for CORS.
    /// Override: `AIRWAVE_CLIENT_ORIGIN`
    pub client_origin: Option<String>,

    /// Per-listener sink buffer, in chunks.
    pub sink_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 3001,
            soundcloud_client_id: None,
            youtube_cookie: None,
            youtube_cookie_file: None,
            youtube_user_agent: None,
            external_fetcher_format: None,
            disable_external_fetcher: false,
            external_fetcher_first: false,
            allowed_ids: Vec::new(),
            admin_ids: Vec::new(),
            client_origin: None,
            sink_capacity: airwave_core::StreamingConfig::default().sink_capacity,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AIRWAVE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("AIRWAVE_SOUNDCLOUD_CLIENT_ID") {
            if !val.is_empty() {
                self.soundcloud_client_id = Some(val);
            }
        }
        if let Ok(val) = std::env::var("AIRWAVE_YOUTUBE_COOKIE") {
            if !val.is_empty() {
                self.youtube_cookie = Some(val);
            }
        }
        if let Ok(val) = std::env::var("AIRWAVE_YOUTUBE_COOKIE_FILE") {
            if !val.is_empty() {
                self.youtube_cookie_file = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("AIRWAVE_CLIENT_ORIGIN") {
            if !val.is_empty() {
                self.client_origin = Some(val);
            }
        }
    }

    /// Converts to airwave-core's Config type.
    pub fn to_core_config(&self) -> airwave_core::Config {
        airwave_core::Config {
            soundcloud_client_id: self.soundcloud_client_id.clone(),
            youtube_cookie: self.youtube_cookie.clone(),
            youtube_cookie_file: self.youtube_cookie_file.clone(),
            youtube_user_agent: self.youtube_user_agent.clone(),
            external_fetcher_format: self.external_fetcher_format.clone(),
            disable_external_fetcher: self.disable_external_fetcher,
            external_fetcher_first: self.external_fetcher_first,
            allowed_ids: self.allowed_ids.clone(),
            admin_ids: self.admin_ids.clone(),
            client_origin: self.client_origin.clone(),
            streaming: airwave_core::StreamingConfig {
                sink_capacity: self.sink_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_to_valid_core_config() {
        let config = ServerConfig::default();
        assert!(config.to_core_config().validate().is_ok());
    }

    #[test]
    fn yaml_fields_parse() {
        let yaml = r#"
bind_port: 8080
soundcloud_client_id: "sc123"
allowed_ids: ["alice", "bob"]
disable_external_fetcher: true
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.soundcloud_client_id.as_deref(), Some("sc123"));
        assert_eq!(config.allowed_ids, ["alice", "bob"]);
        assert!(config.disable_external_fetcher);
        assert!(!config.external_fetcher_first);
    }
}
