pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::{index::IndexingService, search::SearchService};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub indexing: Arc<IndexingService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(search: Arc<SearchService>, indexing: Arc<IndexingService>) -> Self {
        Self {
            search,
            indexing,
            started_at: Instant::now(),
        }
    }
}
