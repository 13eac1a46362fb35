//! Notification handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::storage::MarkRead;
use crate::web::config::{DEFAULT_NOTIFICATION_LIMIT, MAX_NOTIFICATION_LIMIT};
use crate::web::state::SharedState;
use crate::web::utils::{api_error, CurrentUser};

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    /// Include notifications that were already read.
    pub all: Option<bool>,
    pub limit: Option<u32>,
}

pub async fn list_notifications_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<ListNotificationsQuery>,
) -> Response {
    let unread_only = !params.all.unwrap_or(false);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .min(MAX_NOTIFICATION_LIMIT);

    let st = state.db.lock().await;
    match st.list_notifications(&user_id, unread_only, limit) {
        Ok(rows) => (StatusCode::OK, axum::Json(rows)).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn count_notifications_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
) -> Response {
    let st = state.db.lock().await;
    match st.count_unread_notifications(&user_id) {
        Ok(count) => {
            (StatusCode::OK, axum::Json(serde_json::json!({ "unread": count }))).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn mark_read_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Response {
    // Only the recipient may mark a notification read.
    {
        let st = state.db.lock().await;
        match st.get_notification(id) {
            Ok(Some(n)) if n.recipient_id == user_id => {}
            Ok(_) => return api_error(StatusCode::NOT_FOUND, "notification not found"),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    match state.db.mark_notification_read(id).await {
        Ok(MarkRead::NotFound) => api_error(StatusCode::NOT_FOUND, "notification not found"),
        Ok(outcome) => {
            let changed = outcome == MarkRead::Marked;
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "id": id, "read": true, "changed": changed })),
            )
                .into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn mark_all_read_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
) -> Response {
    match state.db.mark_all_notifications_read(&user_id).await {
        Ok(marked) => {
            (StatusCode::OK, axum::Json(serde_json::json!({ "marked": marked }))).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
