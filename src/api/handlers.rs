//! Route handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;
use crate::engine::{GeneratedImage, GenerationRequest};
use crate::models::DEFAULT_SEARCH_LIMIT;
use crate::telemetry::{self, MetricsSnapshot};

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: String,
    pub version: String,
    pub device: String,
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Diffusion Studio API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        device: state.cache().device().to_string(),
    })
}

/// POST /api/v1/image/generate
pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GeneratedImage>, ApiError> {
    let guard = state.shutdown.track().ok_or(ApiError::ShuttingDown)?;
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;

    // Runs to completion even if the client goes away; the guard keeps
    // shutdown waiting for it.
    let orchestrator = state.orchestrator.clone();
    let image = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        orchestrator.generate(&request)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("generation task failed: {e}")))??;

    Ok(Json(image))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub models: Vec<String>,
}

/// GET /api/v1/models/search
pub async fn search_models(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let models = state.catalog.search(&params.query, limit).await?;
    Ok(Json(SearchResponse { models }))
}

/// GET /api/v1/models/resident
pub async fn resident_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache().snapshot())
}

#[derive(Debug, Deserialize)]
pub struct EvictRequest {
    pub model_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvictResponse {
    pub model_id: String,
    pub evicted: bool,
}

/// POST /api/v1/models/evict
pub async fn evict_model(
    State(state): State<AppState>,
    body: Result<Json<EvictRequest>, JsonRejection>,
) -> Result<Json<EvictResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let evicted = state.cache().evict(&req.model_id);
    Ok(Json(EvictResponse { model_id: req.model_id, evicted }))
}

/// GET /api/v1/metrics
pub async fn metrics() -> Json<MetricsSnapshot> {
    Json(telemetry::metrics_snapshot())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.report(state.health_inputs());
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /health/live
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_alive() {
        (StatusCode::OK, "alive")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "dead")
    }
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_ready(&state.health_inputs()) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
