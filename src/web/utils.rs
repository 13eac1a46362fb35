//! Shared utility functions for the web server.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::web::config::USER_ID_HEADER;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    if status.is_server_error() {
        crate::dlog!("request failed ({}): {}", status.as_u16(), message);
    }
    let body = serde_json::json!({ "error": message });
    (status, axum::Json(body)).into_response()
}

fn header_user_id(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Identity of the caller, taken from the `x-user-id` header. Rejects with
/// 401 when the header is missing.
pub struct CurrentUser(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_user_id(parts)
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated)
    }
}

/// Like [`CurrentUser`] but for routes that also serve anonymous callers.
pub struct MaybeUser(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(header_user_id(parts)))
    }
}
