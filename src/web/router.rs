//! Axum router construction.

use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::web::config::USER_ID_HEADER;
use crate::web::handlers;
use crate::web::state::SharedState;

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ])
}

/// Build the complete Axum router with the server functions and API routes.
pub fn build_router(state: SharedState) -> Router {
    let functions: Router<SharedState> = Router::new()
        .route(
            "/functions/toggle-like",
            post(handlers::functions::toggle_like_handler),
        )
        .route(
            "/functions/notify-email",
            post(handlers::functions::notify_email_handler),
        );

    Router::new()
        .merge(functions)
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Notifications API
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/count",
            get(handlers::notifications::count_notifications_handler),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read_handler),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_read_handler),
        )
        // Messages API
        .route(
            "/api/messages/unread-count",
            get(handlers::messages::unread_count_handler),
        )
        .route(
            "/api/chats/:chat_id/read",
            post(handlers::messages::mark_chat_read_handler),
        )
        // Stories API
        .route("/api/stories", get(handlers::stories::list_stories_handler))
        .route(
            "/api/stories/:story_id/view",
            post(handlers::stories::view_story_handler),
        )
        // Search API
        .route("/api/search", get(handlers::search::search_handler))
        // Profiles API
        .route(
            "/api/profile",
            axum::routing::put(handlers::profiles::update_own_profile_handler),
        )
        .route(
            "/api/profiles/:user_id",
            get(handlers::profiles::get_profile_handler),
        )
        // Follows API
        .route(
            "/api/follows/:user_id",
            post(handlers::follows::follow_handler).delete(handlers::follows::unfollow_handler),
        )
        // WebSocket
        .route("/api/ws", get(handlers::websocket::ws_handler))
        .layer(cors_layer())
        .with_state(state)
}
