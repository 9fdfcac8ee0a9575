use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::index::{EventReport, FailedUnit, IndexingStats, RebuildJob, ReindexOutcome, StaleUnit};
use crate::metrics::gather_metrics;
use crate::models::IndexEvent;
use crate::search::{SearchRequest, SearchResponse};
use crate::state::CacheStats;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        backend: state.indexing.index().store().backend().to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: String,
}

/// Search units
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let response = state.search.search(request).await?;
    Ok(Json(response))
}

/// Apply an entity-change event to the index
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<IndexEvent>,
) -> Result<Json<EventReport>> {
    let report = state.indexing.handle_event(&event).await?;
    Ok(Json(report))
}

/// Start a background full rebuild
pub async fn start_rebuild(State(state): State<AppState>) -> (StatusCode, Json<RebuildAccepted>) {
    let job_id = state.indexing.start_full_rebuild();
    (
        StatusCode::ACCEPTED,
        Json(RebuildAccepted {
            job_id,
            status_url: format!("/admin/index/jobs/{}", job_id),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RebuildAccepted {
    pub job_id: Uuid,
    pub status_url: String,
}

/// Rebuild job progress
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RebuildJob>> {
    state
        .indexing
        .job(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Rebuild job {} not found", id)))
}

/// Reindex one unit now
pub async fn reindex_unit(
    State(state): State<AppState>,
    Json(request): Json<ReindexRequest>,
) -> Result<Json<ReindexOutcome>> {
    let outcome = state
        .indexing
        .reindex_unit(request.property_id, request.unit_id)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub property_id: Uuid,
    pub unit_id: Uuid,
}

/// Flush / compact the index store
pub async fn flush_index(State(state): State<AppState>) -> Result<StatusCode> {
    state.indexing.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Index and cache statistics
pub async fn index_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let index = state.indexing.statistics().await?;
    Ok(Json(StatsResponse {
        index,
        cache: state.search.cache_stats(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub index: IndexingStats,
    pub cache: CacheStats,
}

/// Units whose last update failed
pub async fn failed_units(State(state): State<AppState>) -> Json<Vec<FailedUnit>> {
    Json(state.indexing.failed_units())
}

/// Units lagging the catalog beyond the staleness window
pub async fn stale_units(State(state): State<AppState>) -> Result<Json<Vec<StaleUnit>>> {
    Ok(Json(state.indexing.find_stale_units().await?))
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
