//! HTTP client for the REST endpoints.
//!
//! Errors keep the server's `ErrorBody` so callers can tell "no seats left"
//! from "not found" from "try again" without parsing messages.

use reqwest::{Method, RequestBuilder, Response};
use wire::{
    ADMIN_TOKEN_HEADER, Booking, BookingRequest, ErrorBody, Favorite, FavoriteRequest, STATE_VERSION_HEADER,
    SeatAdjustment, Space, USER_ID_HEADER,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing user id; pass --user-id or set CALM_USER_ID")]
    MissingUserId,
    #[error("server returned {status}: {} ({})", .body.message, .body.code)]
    Server { status: u16, body: ErrorBody },
    #[error("server returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl ApiError {
    /// Server error code such as `E_SPACE_FULL`, if the server sent one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { body, .. } => Some(body.code.as_str()),
            _ => None,
        }
    }

    /// Whether the same request may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server { body, .. } => body.retryable,
            Self::Http(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            Self::MissingUserId => false,
        }
    }

    /// Short explanation for people at a terminal.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.code() {
            Some("E_SPACE_FULL") => "no seats left in this space".to_owned(),
            Some("E_SPACE_NOT_FOUND") => "space not found".to_owned(),
            Some("E_BOOKING_NOT_FOUND") => "booking not found".to_owned(),
            Some("E_ALREADY_CANCELLED") => "booking was already cancelled".to_owned(),
            Some("E_FAVORITE_NOT_FOUND") => "space is not in your favorites".to_owned(),
            _ if self.is_retryable() => format!("temporarily unavailable, try again ({self})"),
            _ => self.to_string(),
        }
    }
}

/// REST client bound to one server and, optionally, one caller identity.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
    admin_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http: reqwest::Client::new(), base_url, user_id: None, admin_token: None }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    #[must_use]
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// # Errors
    ///
    /// Fails if the server is unreachable or not healthy.
    pub async fn healthz(&self) -> Result<serde_json::Value, ApiError> {
        let response = self.request(Method::GET, "/healthz").send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// All spaces and the `x-state-version` they reflect.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn list_spaces(&self) -> Result<(Vec<Space>, Option<u64>), ApiError> {
        let response = check(self.request(Method::GET, "/api/spaces").send().await?).await?;
        let version = response
            .headers()
            .get(STATE_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        Ok((response.json().await?, version))
    }

    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn get_space(&self, space_id: i64) -> Result<Space, ApiError> {
        let response = self.request(Method::GET, &format!("/api/spaces/{space_id}")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiError`]; `E_SPACE_FULL` when no seat is left.
    pub async fn book(&self, request: &BookingRequest) -> Result<Booking, ApiError> {
        let response = self.user_request(Method::POST, "/api/bookings")?.json(request).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn cancel(&self, booking_id: i64) -> Result<Booking, ApiError> {
        let response = self.user_request(Method::DELETE, &format!("/api/bookings/{booking_id}"))?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let response = self.user_request(Method::GET, "/api/bookings")?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Your favorites, newest first, each with the space's current state.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn list_favorites(&self) -> Result<Vec<Favorite>, ApiError> {
        let response = self.user_request(Method::GET, "/api/favorites")?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiError`]; `E_SPACE_NOT_FOUND` for an unknown space.
    pub async fn add_favorite(&self, space_id: i64) -> Result<Favorite, ApiError> {
        let response =
            self.user_request(Method::POST, "/api/favorites")?.json(&FavoriteRequest { space_id }).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiError`]; `E_FAVORITE_NOT_FOUND` if the space was not a favorite.
    pub async fn remove_favorite(&self, space_id: i64) -> Result<(), ApiError> {
        let response = self.user_request(Method::DELETE, &format!("/api/favorites/{space_id}"))?.send().await?;
        check(response).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn adjust_seats(&self, space_id: i64, delta: i32) -> Result<Space, ApiError> {
        let mut builder = self
            .request(Method::POST, &format!("/api/admin/spaces/{space_id}/seats"))
            .json(&SeatAdjustment { delta });
        if let Some(token) = &self.admin_token {
            builder = builder.header(ADMIN_TOKEN_HEADER, token);
        }
        Ok(check(builder.send().await?).await?.json().await?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{path}", self.base_url))
    }

    fn user_request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let user_id = self.user_id.as_deref().ok_or(ApiError::MissingUserId)?;
        Ok(self.request(method, path).header(USER_ID_HEADER, user_id))
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ApiError::Server { status: status.as_u16(), body }),
        Err(_) => Err(ApiError::UnexpectedStatus { status: status.as_u16(), body: text }),
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
