pub mod api_docs;
pub mod config;
pub mod controllers;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shared_state;

use axum::{Router, response::Html, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_scalar::Scalar;

use crate::api_docs::ApiDoc;
use crate::routes::estimate_routes::api_routes;
use crate::shared_state::AppState;

/// Full HTTP application: `/api/*` plus the Scalar reference at `/scalar`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(state))
        .route("/scalar", get(|| async { Html(Scalar::new(ApiDoc::openapi()).to_html()) }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
