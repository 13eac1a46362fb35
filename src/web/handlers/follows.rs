//! Follow handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web::state::SharedState;
use crate::web::utils::{api_error, CurrentUser};

pub async fn follow_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Path(target_id): Path<String>,
) -> Response {
    if target_id == user_id {
        return api_error(StatusCode::BAD_REQUEST, "cannot follow yourself");
    }
    match state.db.lock().await.get_user(&target_id) {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    match state.db.follow(&user_id, &target_id).await {
        Ok(created) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "following": true, "created": created })),
        )
            .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn unfollow_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Path(target_id): Path<String>,
) -> Response {
    match state.db.unfollow(&user_id, &target_id).await {
        Ok(removed) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "following": false, "removed": removed })),
        )
            .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
