//! HTTP API layer.
//!
//! Thin handlers over the engine plus router construction and server
//! startup. One [`AppState`] instance owns the engine and is cloned into
//! every handler.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::access::AccessPolicy;
use crate::engine::BroadcastEngine;
use crate::state::Config;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// The broadcast engine driving playback and fan-out.
    pub engine: Arc<BroadcastEngine>,
    /// Allow-list / admin-list policy.
    pub policy: Arc<AccessPolicy>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Client for metadata lookups and thumbnail fetches.
    pub http: reqwest::Client,
}

impl AppState {
    /// Builds the application state with the production engine.
    pub fn new(config: Config) -> Self {
        let policy = Arc::new(AccessPolicy::from_config(&config));
        let config = Arc::new(config);
        let engine = BroadcastEngine::new(Arc::clone(&config));
        Self {
            engine,
            policy,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Starts the engine's background tasks (event loop, idle silence).
    pub fn start_background_tasks(&self) {
        self.engine.start_background_tasks();
    }
}

/// Starts the HTTP server on the given port.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://0.0.0.0:{port}");

    let app = http::create_router(state);

    // Connect info enables per-listener logging on the stream endpoint.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
