//! Federated search endpoint.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::web::state::SharedState;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search_handler(
    State(state): State<SharedState>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    let results = state.search.search(&params.q).await;
    (StatusCode::OK, axum::Json(results))
}
