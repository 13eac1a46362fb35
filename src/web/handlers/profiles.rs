//! Profile handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::db::now_secs;
use crate::storage::ProfileRow;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, CurrentUser};

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

pub async fn get_profile_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Response {
    let st = state.db.lock().await;
    let user = match st.get_user(&user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let profile = match st.get_profile(&user_id) {
        Ok(p) => p,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let followers = match st.count_followers(&user_id) {
        Ok(n) => n,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let json = serde_json::json!({
        "user_id": user.id,
        "username": user.username,
        "display_name": profile.as_ref().and_then(|p| p.display_name.clone()),
        "bio": profile.as_ref().and_then(|p| p.bio.clone()),
        "avatar_url": profile.as_ref().and_then(|p| p.avatar_url.clone()),
        "followers": followers,
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// Partial update: fields left out keep their current value.
pub async fn update_own_profile_handler(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    axum::Json(req): axum::Json<UpdateProfileRequest>,
) -> Response {
    let existing = {
        let st = state.db.lock().await;
        match st.get_user(&user_id) {
            Ok(Some(_)) => {}
            Ok(None) => return api_error(StatusCode::NOT_FOUND, "user not found"),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
        match st.get_profile(&user_id) {
            Ok(p) => p.unwrap_or_default(),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    };

    let profile = ProfileRow {
        user_id: user_id.clone(),
        display_name: req.display_name.or(existing.display_name),
        bio: req.bio.or(existing.bio),
        avatar_url: req.avatar_url.or(existing.avatar_url),
        updated_at: now_secs(),
    };

    if let Err(e) = state.db.upsert_profile(&profile).await {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    (StatusCode::OK, axum::Json(profile)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::Database;
    use crate::web::state::AppState;

    #[tokio::test]
    async fn profile_read_failure_is_a_server_error() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("ada", None).await.unwrap();
        let state: SharedState = Arc::new(AppState::new(db.clone()));

        let ok = get_profile_handler(State(Arc::clone(&state)), Path(user.id.clone())).await;
        assert_eq!(ok.status(), StatusCode::OK);

        db.lock().await.execute_batch("DROP TABLE profiles;").unwrap();
        let failed = get_profile_handler(State(state), Path(user.id)).await;
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
