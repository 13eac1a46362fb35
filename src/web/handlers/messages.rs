//! Message badge handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web::state::SharedState;
use crate::web::utils::{api_error, CurrentUser};

pub async fn unread_count_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
) -> Response {
    let st = state.db.lock().await;
    match st.count_unread_messages(&user_id) {
        Ok(count) => {
            (StatusCode::OK, axum::Json(serde_json::json!({ "unread": count }))).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn mark_chat_read_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
) -> Response {
    {
        let st = state.db.lock().await;
        match st.list_chat_members(&chat_id) {
            Ok(members) if members.contains(&user_id) => {}
            Ok(_) => return api_error(StatusCode::NOT_FOUND, "chat not found"),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    match state.db.mark_chat_read(&chat_id, &user_id).await {
        Ok(marked) => {
            (StatusCode::OK, axum::Json(serde_json::json!({ "marked": marked }))).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
