//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the engine and helper modules.
//! The one exception is the stream endpoint, which owns the listener sink
//! lifecycle: attach on request, detach when the response body is dropped.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::access::{Approved, MaybeUser};
use crate::api::AppState;
use crate::error::{AirwaveError, AirwaveResult};
use crate::fetch::normalize;
use crate::metadata;
use crate::protocol_constants::SERVICE_ID;
use crate::snapshot::StreamState;
use crate::thumbnail;
use crate::track::{Track, TrackSource};

// ─────────────────────────────────────────────────────────────────────────────
// Request Bodies
// ─────────────────────────────────────────────────────────────────────────────

// Bodies are read as raw JSON values so that a missing or mistyped field is
// a 400, not the extractor's 422 (reserved for unsupported URLs).

fn body_str(payload: &serde_json::Value, field: &str) -> AirwaveResult<String> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AirwaveError::BadRequest(format!("{field} is required")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let mut cors = CorsLayer::new();
    if let Some(origin) = state
        .config
        .client_origin
        .as_deref()
        .and_then(|o| o.parse::<HeaderValue>().ok())
    {
        cors = cors
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::PATCH])
            .allow_headers([header::CONTENT_TYPE]);
    }

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/me", get(get_me))
        .route("/api/queue", post(enqueue_track))
        .route(
            "/api/queue/{id}",
            axum::routing::delete(remove_track).patch(move_track),
        )
        .route("/api/pause", post(set_paused))
        .route("/api/skip", post(skip_track))
        .route("/stream", get(stream_audio))
        .route("/youtube/thumbnail.png", get(youtube_thumbnail))
        .route("/soundcloud/thumbnail.png", get(soundcloud_thumbnail))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let listeners = state.engine.stream_state().listeners;
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "listeners": listeners,
    }))
}

/// Current stream state for polling clients.
async fn get_status(State(state): State<AppState>) -> Json<StreamState> {
    Json(state.engine.stream_state())
}

/// The caller's identity and whether they may queue tracks.
async fn get_me(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> impl IntoResponse {
    let can_queue = user
        .as_ref()
        .map(|u| state.policy.can_queue(&u.id))
        .unwrap_or(false);
    Json(json!({ "user": user, "canQueue": can_queue }))
}

/// POST /api/queue
///
/// Validates and normalizes the URL, resolves metadata, and appends the
/// track. Metadata failure surfaces to the caller; nothing partial enters
/// the queue.
async fn enqueue_track(
    State(state): State<AppState>,
    Approved(user): Approved,
    Json(payload): Json<serde_json::Value>,
) -> AirwaveResult<impl IntoResponse> {
    let url = body_str(&payload, "url")?;

    let source = normalize::classify(&url).ok_or_else(|| {
        AirwaveError::UnsupportedUrl("only YouTube videos and SoundCloud tracks are supported".into())
    })?;
    if source == TrackSource::Soundcloud && !state.config.soundcloud_enabled() {
        return Err(AirwaveError::FeatureDisabled(
            "SoundCloud support is not configured".into(),
        ));
    }

    let url = normalize::normalize_url(&url);
    if state.engine.has_url(&url) {
        return Err(AirwaveError::BadRequest(
            "that track is already queued".into(),
        ));
    }

    let meta = metadata::resolve(&state.http, &state.config, source, &url).await?;
    let track = state
        .engine
        .queue_track(Track::new(source, url, meta, user.into()));

    Ok((StatusCode::CREATED, Json(json!({ "track": track }))))
}

fn parse_track_id(id: &str) -> AirwaveResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| AirwaveError::NotFound("no such track in the queue".into()))
}

/// DELETE /api/queue/:id
async fn remove_track(
    State(state): State<AppState>,
    _user: Approved,
    Path(id): Path<String>,
) -> AirwaveResult<impl IntoResponse> {
    let id = parse_track_id(&id)?;
    if !state.engine.remove_track(id) {
        return Err(AirwaveError::NotFound("no such track in the queue".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

/// PATCH /api/queue/:id
async fn move_track(
    State(state): State<AppState>,
    _user: Approved,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> AirwaveResult<impl IntoResponse> {
    let index = payload
        .get("index")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AirwaveError::BadRequest("index must be a number".into()))?;
    let id = parse_track_id(&id)?;
    if !state.engine.move_track(id, index) {
        return Err(AirwaveError::NotFound("no such track in the queue".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/pause
async fn set_paused(
    State(state): State<AppState>,
    _user: Approved,
    Json(payload): Json<serde_json::Value>,
) -> AirwaveResult<impl IntoResponse> {
    let requested = payload
        .get("paused")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| AirwaveError::BadRequest("paused must be a boolean".into()))?;
    let paused = state.engine.set_paused(requested);
    Ok(Json(json!({ "ok": true, "paused": paused })))
}

/// POST /api/skip
async fn skip_track(
    State(state): State<AppState>,
    _user: Approved,
) -> AirwaveResult<impl IntoResponse> {
    state.engine.skip_current();
    Ok(Json(json!({ "ok": true })))
}

/// Detaches the listener sink when the response body is dropped.
struct ListenerGuard {
    state: AppState,
    id: Uuid,
    client: std::net::IpAddr,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        log::info!("[Stream] Listener {} disconnected ({})", self.id, self.client);
        self.state.engine.remove_listener(self.id);
    }
}

/// GET /stream
///
/// The broadcast itself: an indefinite `audio/mpeg` body fed by this
/// listener's sink. The server never closes the body while the client is
/// connected; disconnect is observed as the body stream being dropped.
async fn stream_audio(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> Response {
    let (id, rx) = state.engine.attach_listener();
    let client = remote_addr.ip();
    log::info!("[Stream] Listener {id} connected ({client})");

    // The guard travels inside the body stream; dropping the response
    // (client disconnect) drops the stream and detaches the sink.
    let guard = ListenerGuard { state, id, client };
    let body = ReceiverStream::new(rx).map(move |chunk| {
        let _keep = &guard;
        Ok::<Bytes, std::io::Error>(chunk)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .expect("static stream response headers are valid")
}

async fn thumbnail_response(
    state: &AppState,
    source: TrackSource,
    cover_fit: bool,
) -> AirwaveResult<Response> {
    let url = state
        .engine
        .thumbnail_for(source)
        .ok_or_else(|| AirwaveError::NotFound(format!("nothing playing from {source}")))?;
    let png = thumbnail::fetch_png(&state.http, &url, cover_fit).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(png))
        .expect("static thumbnail response headers are valid"))
}

/// GET /youtube/thumbnail.png
async fn youtube_thumbnail(State(state): State<AppState>) -> AirwaveResult<Response> {
    thumbnail_response(&state, TrackSource::Youtube, false).await
}

/// GET /soundcloud/thumbnail.png (256x256 cover fit)
async fn soundcloud_thumbnail(State(state): State<AppState>) -> AirwaveResult<Response> {
    thumbnail_response(&state, TrackSource::Soundcloud, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use crate::access::{USER_ID_HEADER, USER_NAME_HEADER};
    use crate::state::Config;

    fn test_router(config: Config) -> Router {
        create_router(AppState::new(config))
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request
            .header(USER_ID_HEADER, "alice")
            .header(USER_NAME_HEADER, "Alice")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], SERVICE_ID);
    }

    #[tokio::test]
    async fn status_starts_empty() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["current"], serde_json::Value::Null);
        assert_eq!(json["queue"], serde_json::json!([]));
        assert_eq!(json["listeners"], 0);
        assert_eq!(json["paused"], false);
    }

    #[tokio::test]
    async fn me_without_identity_cannot_queue() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(Request::get("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["user"], serde_json::Value::Null);
        assert_eq!(json["canQueue"], false);
    }

    #[tokio::test]
    async fn me_reports_allow_list_verdict() {
        let config = Config {
            allowed_ids: vec!["bob".into()],
            ..Default::default()
        };
        let router = test_router(config);
        let response = router
            .oneshot(
                authed(Request::get("/api/me"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["user"]["id"], "alice");
        assert_eq!(json["canQueue"], false);
    }

    #[tokio::test]
    async fn enqueue_requires_identity() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                Request::post("/api/queue")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"https://youtu.be/x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn enqueue_enforces_allow_list() {
        let config = Config {
            allowed_ids: vec!["bob".into()],
            ..Default::default()
        };
        let router = test_router(config);
        let response = router
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"https://youtu.be/x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn enqueue_without_url_is_bad_request() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enqueue_rejects_unsupported_urls() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"https://example.com/foo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"], "unsupported_url");
    }

    #[tokio::test]
    async fn enqueue_soundcloud_without_client_id_is_disabled() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"url":"https://soundcloud.com/artist/track"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn remove_unknown_track_is_not_found() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::delete(format!("/api/queue/{}", Uuid::new_v4())))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn move_without_index_is_bad_request() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::patch(format!("/api/queue/{}", Uuid::new_v4())))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pause_requires_a_boolean() {
        let router = test_router(Config::default());
        for body in ["{}", r#"{"paused":"yes"}"#] {
            let response = router
                .clone()
                .oneshot(
                    authed(Request::post("/api/pause"))
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        }
    }

    #[tokio::test]
    async fn pause_with_nothing_playing_reports_unpaused() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::post("/api/pause"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"paused":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["paused"], false);
    }

    #[tokio::test]
    async fn skip_always_succeeds() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                authed(Request::post("/api/skip"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn stream_sets_broadcast_headers() {
        let router = test_router(Config::default());
        let mut request = Request::get("/stream").body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(SocketAddr::from(
            ([127, 0, 0, 1], 40000),
        )));
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "audio/mpeg");
        assert_eq!(headers[header::CACHE_CONTROL.as_str()], "no-store");
        assert_eq!(headers[header::CONNECTION.as_str()], "keep-alive");
    }

    #[tokio::test]
    async fn thumbnail_without_current_track_is_not_found() {
        let router = test_router(Config::default());
        let response = router
            .oneshot(
                Request::get("/youtube/thumbnail.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
