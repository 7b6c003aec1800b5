//! Request identity extractors.
//!
//! User identity is supplied by an upstream collaborator in the
//! `x-user-id` header; this service trusts it as-is. Seat corrections
//! require the shared `ADMIN_TOKEN`.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use wire::{ADMIN_TOKEN_HEADER, USER_ID_HEADER};

use crate::error::ApiError;
use crate::state::AppState;

/// Caller identity taken from the `x-user-id` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthenticated(format!("{USER_ID_HEADER} header required")))?;
        Ok(Self(user_id.to_owned()))
    }
}

/// Proof that the request carried the configured admin token.
#[derive(Debug)]
pub struct AdminAuth;

impl<S> FromRequestParts<S> for AdminAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some(expected) = app_state.config.admin_token.as_deref() else {
            return Err(ApiError::forbidden("seat corrections are disabled"));
        };
        let supplied = parts.headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        if supplied != Some(expected) {
            return Err(ApiError::forbidden("invalid admin token"));
        }
        Ok(Self)
    }
}
