//! devconnect-web: HTTP server for the DevConnect backend.
//!
//! Serves the `toggle-like` and `notify-email` functions, a REST API over
//! notifications, messages, stories, search, profiles and follows, and a
//! WebSocket relay of the change feed. State lives in SQLite.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use std::sync::Arc;

use clap::Parser;

use crate::db::Database;
use crate::storage::StorageError;

use config::{Cli, Config};
use state::{AppState, SharedState};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to open database: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve `db` on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    db: Database,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let state: SharedState = Arc::new(AppState::new(db));
    let app = router::build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Entry point: parse CLI, open the database, start server.
pub async fn run() -> Result<(), ServeError> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::dlog!("devconnect-web starting");
    crate::dlog!("  data directory: {}", config.data_dir.display());

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&config.db_path)?;
    crate::dlog!("  database: {}", config.db_path.display());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    crate::dlog!("devconnect-web listening on http://{}", config.bind_addr);

    serve(listener, db, async {
        let _ = tokio::signal::ctrl_c().await;
        crate::dlog!("shutting down");
    })
    .await?;
    Ok(())
}
