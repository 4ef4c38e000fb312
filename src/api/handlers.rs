use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};
use crate::services::text_extraction::FALLBACK_ENGINE;

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: state.settings().api().project_name.clone(),
        version: state.settings().api().version.clone(),
    })
}

/// Reports degraded when extraction can only produce fallback text.
pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = state.pipeline();
    let mut components = HashMap::new();

    let ocr_engine = pipeline.ocr_engine_name().to_string();
    let status = if ocr_engine == FALLBACK_ENGINE { "degraded" } else { "healthy" };
    components.insert("ocr".to_string(), ocr_engine);

    let scoring = if pipeline.has_secondary_model() { "dual" } else { "single" };
    components.insert("scoring".to_string(), scoring.to_string());

    components.insert("batch".to_string(), state.batch().state().as_str().to_string());

    Json(HealthResponse {
        service: "scangrade-api".to_string(),
        status: status.to_string(),
        components,
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
