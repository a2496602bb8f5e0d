use axum::{Router, middleware, routing::{get, post}};
use crate::controllers::estimate_controller::{
    // Resolution & interpolation
    create_estimate, interpolate,
    // Operations
    get_status, purge_cache,
};
use crate::controllers::monitoring_controller::track_request;
use crate::routes::monitoring_routes::monitoring_routes;
use crate::shared_state::AppState;

/// Build the `/api/*` sub-router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/estimate",            post(create_estimate))
        .route("/interpolate",         post(interpolate))
        .route("/status",              get(get_status))
        .route("/maintenance/purge",   post(purge_cache))
        .merge(monitoring_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), track_request))
        .with_state(state)
}
