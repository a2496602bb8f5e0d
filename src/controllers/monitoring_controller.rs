use std::time::Instant;

use axum::{
    Json,
    extract::{MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::resilience::ResilienceSnapshot;
use crate::services::solar_data_service::{HealthReport, MetricsReport};
use crate::shared_state::AppState;

/// Counts every API request by method and route template.
pub async fn track_request(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency = started.elapsed();
    state.service.metrics().record_request(&method, &route, status, latency);
    if status >= 400 {
        tracing::warn!(%method, %route, status, latency_ms = latency.as_millis() as u64, "request failed");
    } else {
        tracing::debug!(%method, %route, status, latency_ms = latency.as_millis() as u64, "request served");
    }
    response
}

/// GET /api/health
/// Service health
///
/// `healthy`, `recovering` while a breaker is half-open, or `degraded` when the
/// proximity store is unreachable or a breaker is open.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Health report", body = HealthReport)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.health().await).into_response()
}

/// GET /api/metrics
/// Request, provider-call and cache counters
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses(
        (status = 200, description = "Metrics since process start", body = MetricsReport)
    )
)]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.metrics_report()).into_response()
}

/// POST /api/providers/{id}/reset
/// Force a provider's circuit breaker back to CLOSED
#[utoipa::path(
    post,
    path = "/api/providers/{id}/reset",
    params(
        ("id" = String, Path, description = "Provider id, e.g. pvgis")
    ),
    responses(
        (status = 200, description = "Breaker state after the reset", body = ResilienceSnapshot),
        (status = 404, description = "Unknown provider")
    )
)]
pub async fn reset_provider(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.reset_provider(&id) {
        Some(snapshot) => {
            tracing::info!(provider = %id, "circuit breaker reset on request");
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown provider '{id}'")})),
        )
            .into_response(),
    }
}
