//! Story tray handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::now_secs;
use crate::storage::StorageError;
use crate::stories::story_tray;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, CurrentUser, MaybeUser};

pub async fn list_stories_handler(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
) -> Response {
    let st = state.db.lock().await;
    match story_tray(&st, viewer.as_deref(), now_secs()) {
        Ok(cards) => (StatusCode::OK, axum::Json(cards)).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn view_story_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Path(story_id): Path<String>,
) -> Response {
    match state.db.record_story_view(&story_id, &user_id).await {
        Ok(first_view) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "story_id": story_id, "first_view": first_view })),
        )
            .into_response(),
        Err(StorageError::NotFound(_)) => api_error(StatusCode::NOT_FOUND, "story not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
