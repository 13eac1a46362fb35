//! Shared application state.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::db::Database;
use crate::search::SearchAggregator;

pub struct AppState {
    pub db: Database,
    pub search: SearchAggregator,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        let search = SearchAggregator::for_database(&db);
        Self {
            db,
            search,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub type SharedState = Arc<AppState>;
