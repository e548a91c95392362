//! Centralized error types for the Airwave core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::fetch::FetchError;

/// Application-wide error type for the Airwave server.
#[derive(Debug, Error)]
pub enum AirwaveError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No authenticated identity on a request that requires one.
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    /// Authenticated but not approved by the access policy.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Requested resource (track, thumbnail) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The submitted URL is neither a recognized video nor a single track.
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// A feature is disabled by configuration (e.g. SoundCloud without a client id).
    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    /// An upstream service answered with an error or unusable payload.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AirwaveError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedUrl(_) => "unsupported_url",
            Self::FeatureDisabled(_) => "feature_disabled",
            Self::Upstream(_) => "upstream_failure",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedUrl(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::FeatureDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AirwaveResult<T> = Result<T, AirwaveError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AirwaveError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<FetchError> for AirwaveError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unsupported(msg) => Self::UnsupportedUrl(msg),
            FetchError::Timeout(d) => Self::Timeout(format!("fetch exceeded {}s", d.as_secs())),
            FetchError::Upstream(msg) => Self::Upstream(msg),
            FetchError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for AirwaveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_url_maps_to_422() {
        let err = AirwaveError::UnsupportedUrl("https://example.com/foo".into());
        assert_eq!(err.code(), "unsupported_url");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn feature_disabled_maps_to_503() {
        let err = AirwaveError::FeatureDisabled("soundcloud".into());
        assert_eq!(err.code(), "feature_disabled");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn upstream_maps_to_502() {
        let err = AirwaveError::Upstream("thumbnail fetch".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn fetch_errors_convert_with_matching_codes() {
        let err: AirwaveError = FetchError::Unsupported("nope".into()).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err: AirwaveError =
            FetchError::Timeout(std::time::Duration::from_secs(5)).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: AirwaveError = FetchError::Upstream("bad gateway".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
