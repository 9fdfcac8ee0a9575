use crate::api::{handlers, AppState};
use crate::metrics::track_http_metrics;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::health_check))
        // Search
        .route("/v1/search", post(handlers::search))
        // Entity-change events
        .route("/v1/index/events", post(handlers::submit_event))
        // Administration
        .route("/admin/index/rebuild", post(handlers::start_rebuild))
        .route("/admin/index/jobs/:id", get(handlers::get_job))
        .route("/admin/index/reindex", post(handlers::reindex_unit))
        .route("/admin/index/flush", post(handlers::flush_index))
        .route("/admin/index/stats", get(handlers::index_stats))
        .route("/admin/index/failed", get(handlers::failed_units))
        .route("/admin/index/stale", get(handlers::stale_units))
        // Prometheus
        .route("/metrics", get(handlers::metrics))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
