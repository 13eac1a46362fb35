//! Server function endpoints under `/functions`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::functions::{self, NotifyEmailRequest, ToggleLikeRequest};
use crate::web::state::SharedState;

/// An empty body is treated as `{}` so that missing fields surface as a
/// validation error rather than a JSON rejection.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))
}

pub async fn toggle_like_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let req: ToggleLikeRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    match functions::toggle_like(&state.db, req).await {
        Ok(resp) => (StatusCode::OK, axum::Json(resp)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn notify_email_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let req: NotifyEmailRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    match functions::notify_email(&state.db, req).await {
        Ok(resp) => (StatusCode::OK, axum::Json(resp)).into_response(),
        Err(e) => e.into_response(),
    }
}
