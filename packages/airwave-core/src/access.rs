//! Identity extraction and access policy.
//!
//! Authentication itself is the identity provider's job: it runs in front
//! of this service and forwards the verified user as trusted headers. This
//! module extracts that identity and evaluates the allow/admin lists that
//! gate queue mutation.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::HashSet;

use crate::api::AppState;
use crate::error::AirwaveError;
use crate::state::Config;
use crate::track::Requester;

/// Headers the identity provider forwards after authenticating a request.
pub const USER_ID_HEADER: &str = "x-airwave-user-id";
pub const USER_NAME_HEADER: &str = "x-airwave-user-name";
pub const USER_AVATAR_HEADER: &str = "x-airwave-user-avatar";

/// A verified user identity.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserIdentity {
    /// Reads the identity headers, if present.
    pub fn from_headers(parts: &Parts) -> Option<Self> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        let id = header(USER_ID_HEADER)?;
        let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| id.clone());
        Some(Self {
            id,
            display_name,
            avatar: header(USER_AVATAR_HEADER),
        })
    }
}

impl From<UserIdentity> for Requester {
    fn from(user: UserIdentity) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            avatar: user.avatar,
        }
    }
}

/// Allow-list / admin-list policy.
#[derive(Debug, Default)]
pub struct AccessPolicy {
    allowed: HashSet<String>,
    admins: HashSet<String>,
}

impl AccessPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed: config.allowed_ids.iter().cloned().collect(),
            admins: config.admin_ids.iter().cloned().collect(),
        }
    }

    /// Whether the user may mutate the queue and playback. An empty allow
    /// list means open access; admins always pass.
    pub fn can_queue(&self, user_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(user_id) || self.is_admin(user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }
}

/// Extractor for endpoints that require an authenticated, approved user.
pub struct Approved(pub UserIdentity);

impl FromRequestParts<AppState> for Approved {
    type Rejection = AirwaveError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = UserIdentity::from_headers(parts)
            .ok_or_else(|| AirwaveError::Unauthenticated("sign in to use the queue".into()))?;
        if !state.policy.can_queue(&user.id) {
            return Err(AirwaveError::Forbidden(
                "your account is not on the listener allow list".into(),
            ));
        }
        Ok(Self(user))
    }
}

/// Extractor that yields the identity when present, without requiring it.
pub struct MaybeUser(pub Option<UserIdentity>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(UserIdentity::from_headers(parts)))
    }
}
