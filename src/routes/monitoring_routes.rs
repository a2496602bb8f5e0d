use axum::{Router, routing::{get, post}};
use crate::controllers::monitoring_controller::{get_health, get_metrics, reset_provider};
use crate::shared_state::AppState;

/// Health, metrics and breaker administration; merged into `/api`.
pub fn monitoring_routes() -> Router<AppState> {
    Router::new()
        .route("/health",                get(get_health))
        .route("/metrics",               get(get_metrics))
        .route("/providers/{id}/reset",  post(reset_provider))
}
