//! WebSocket relay of the change feed.
//!
//! A client connects to `/api/ws?table=notifications` (optionally several
//! tables, comma separated) and receives every change event on those tables
//! that concerns it. The caller is identified by the `x-user-id` header or,
//! for browsers that cannot set headers on upgrade, a `user_id` query
//! parameter.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::feed::{ChangeEvent, Table};
use crate::web::config::MAX_WS_CONNECTIONS;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, MaybeUser};

#[derive(Deserialize)]
pub struct WsQuery {
    pub table: Option<String>,
    pub user_id: Option<String>,
}

fn parse_tables(raw: Option<&str>) -> Result<HashSet<Table>, String> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Err("table is required".to_string());
    };
    raw.split(',')
        .map(str::trim)
        .map(|name| Table::parse(name).ok_or_else(|| format!("unknown table: {name}")))
        .collect()
}

fn record_field<'a>(event: &'a ChangeEvent, column: &str) -> Option<&'a str> {
    event.record.get(column).and_then(|v| v.as_str())
}

/// Whether `event` should be relayed to `user_id`.
async fn concerns(state: &SharedState, event: &ChangeEvent, user_id: &str) -> bool {
    let is_user = |column: &str| record_field(event, column) == Some(user_id);
    match event.table {
        Table::Notifications => is_user("recipient_id"),
        Table::Profiles | Table::StoryViews => is_user("user_id"),
        Table::Follows => is_user("follower_id") || is_user("following_id"),
        Table::Messages => {
            let Some(chat_id) = record_field(event, "chat_id") else {
                return false;
            };
            let st = state.db.lock().await;
            st.list_chat_members(chat_id)
                .map(|members| members.iter().any(|m| m == user_id))
                .unwrap_or(false)
        }
        Table::Users | Table::Posts | Table::Likes | Table::Stories => true,
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    MaybeUser(header_user): MaybeUser,
    Query(params): Query<WsQuery>,
) -> Response {
    let Some(user_id) = header_user.or(params.user_id) else {
        return api_error(StatusCode::UNAUTHORIZED, "authentication required");
    };
    let tables = match parse_tables(params.table.as_deref()) {
        Ok(t) => t,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e),
    };

    // Check connection limit before upgrading
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {})", MAX_WS_CONNECTIONS),
        );
    }

    ws.on_upgrade(move |socket| ws_connection(socket, state, user_id, tables))
        .into_response()
}

async fn ws_connection(
    mut socket: WebSocket,
    state: SharedState,
    user_id: String,
    tables: HashSet<Table>,
) {
    let ws_count = state.ws_connection_count.clone();
    ws_count.fetch_add(1, Ordering::Relaxed);
    let mut rx = state.db.feed().receiver();
    crate::dlog!(
        "ws: {} connected, {} table(s)",
        crate::logging::user_id(&user_id),
        tables.len()
    );

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !tables.contains(&event.table) || !concerns(&state, &event, &user_id).await {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        crate::dlog!("ws client lagged, skipped {n} events");
                        // The client refetches when it sees this.
                        let lag_msg = serde_json::json!({
                            "type": "events_missed",
                            "count": n,
                        });
                        if let Ok(json) = serde_json::to_string(&lag_msg) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = socket.send(WsMessage::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    ws_count.fetch_sub(1, Ordering::Relaxed);
    crate::dlog!("ws: {} disconnected", crate::logging::user_id(&user_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::Database;
    use crate::feed::ChangeKind;
    use crate::web::state::AppState;

    fn change(table: Table, record: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            record,
        }
    }

    #[test]
    fn table_list_parsing() {
        let tables = parse_tables(Some("notifications, messages")).unwrap();
        assert!(tables.contains(&Table::Notifications));
        assert!(tables.contains(&Table::Messages));
        assert!(parse_tables(None).is_err());
        assert!(parse_tables(Some("nope")).is_err());
    }

    #[tokio::test]
    async fn events_are_scoped_to_the_caller() {
        let db = Database::open_in_memory().unwrap();
        let chat = db
            .create_chat(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let state: SharedState = Arc::new(AppState::new(db));

        let message = change(
            Table::Messages,
            serde_json::json!({ "id": "m1", "chat_id": chat, "sender_id": "a" }),
        );
        assert!(concerns(&state, &message, "b").await);
        assert!(!concerns(&state, &message, "c").await);

        let notification = change(Table::Notifications, serde_json::json!({ "recipient_id": "b" }));
        assert!(concerns(&state, &notification, "b").await);
        assert!(!concerns(&state, &notification, "a").await);

        let follow = change(
            Table::Follows,
            serde_json::json!({ "follower_id": "a", "following_id": "b" }),
        );
        assert!(concerns(&state, &follow, "a").await);
        assert!(concerns(&state, &follow, "b").await);
        assert!(!concerns(&state, &follow, "c").await);
    }
}
