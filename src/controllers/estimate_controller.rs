use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::SolarError;
use crate::models::estimate::{EstimateQuery, EstimateRequest, EstimateResult, InterpolateRequest};
use crate::models::interpolation::{DataTier, InterpolationResult, MonthValue};
use crate::models::radiation::Coordinate;
use crate::services::solar_data_service::{MAX_AREA_M2, ServiceStatus};
use crate::shared_state::AppState;

fn error_response(err: &SolarError) -> Response {
    let status = match err {
        SolarError::InvalidCoordinate { .. }
        | SolarError::InvalidPanelGeometry { .. }
        | SolarError::InvalidArea(_) => StatusCode::BAD_REQUEST,
        SolarError::ModelNotFound(_) => StatusCode::NOT_FOUND,
        SolarError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn model_headers(tier: DataTier, confidence: f64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-Data-Tier", HeaderValue::from_static(tier.as_str()));
    if let Ok(value) = HeaderValue::from_str(&format!("{confidence:.3}")) {
        headers.insert("X-Confidence-Score", value);
    }
    if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert("X-Request-ID", value);
    }
    headers
}

/// POST /api/estimate
/// Estimate annual and monthly generation for a location
///
/// Resolves (or reuses) the radiation model for the coordinate and evaluates it for the
/// given panel. Tilt and orientation default to the location's optimum; orientation may be
/// degrees clockwise from north or a compass point (N, NE, ..., NW, auto).
#[utoipa::path(
    post,
    path = "/api/estimate",
    request_body = EstimateRequest,
    responses(
        (status = 200, description = "Generation estimate", body = EstimateResult),
        (status = 400, description = "Invalid coordinate, area or panel geometry"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_estimate(State(state): State<AppState>, Json(req): Json<EstimateRequest>) -> impl IntoResponse {
    let orientation = match req.orientation.as_ref().map(|o| o.to_degrees()).transpose() {
        Ok(degrees) => degrees.flatten(),
        Err(message) => return bad_request(message),
    };
    let query = EstimateQuery {
        latitude: req.lat,
        longitude: req.lon,
        area_m2: req.area_m2,
        tilt: req.tilt,
        orientation,
        country_code: req.country_code,
        include_narrative: req.include_narrative,
    };

    match state.service.resolve_estimate(query).await {
        Ok(result) => {
            let headers = model_headers(result.data_tier, result.confidence_score);
            (StatusCode::OK, headers, Json(result)).into_response()
        }
        Err(err) => {
            tracing::warn!(lat = req.lat, lon = req.lon, error = %err, "estimate rejected");
            error_response(&err)
        }
    }
}

/// POST /api/interpolate
/// Evaluate a panel configuration against an already resolved location
///
/// Never contacts an upstream provider. Returns 404 when no model is cached for the
/// coordinate (exactly or within the proximity radius); call `/api/estimate` first.
#[utoipa::path(
    post,
    path = "/api/interpolate",
    request_body = InterpolateRequest,
    responses(
        (status = 200, description = "Interpolated generation, scaled by area_m2 when given", body = InterpolationResult),
        (status = 400, description = "Invalid coordinate, area or panel geometry"),
        (status = 404, description = "No cached model for this location")
    )
)]
pub async fn interpolate(State(state): State<AppState>, Json(req): Json<InterpolateRequest>) -> impl IntoResponse {
    let coordinate = match Coordinate::new(req.lat, req.lon) {
        Ok(c) => c,
        Err(err) => return error_response(&err),
    };
    if let Some(area) = req.area_m2 {
        if !(area > 0.0 && area <= MAX_AREA_M2) {
            return error_response(&SolarError::InvalidArea(area));
        }
    }
    let resolved_orientation = match req.orientation.to_degrees() {
        Ok(degrees) => degrees,
        Err(message) => return bad_request(message),
    };

    let key = state.service.key_for(coordinate);
    let orientation = match resolved_orientation {
        Some(orientation) => orientation,
        // "auto" needs the cached model's optimum before querying.
        None => match state.service.cached_model(&key).await {
            Some(cached) => cached.model.optimal_orientation(),
            None => return error_response(&SolarError::ModelNotFound(key.to_string())),
        },
    };
    let (resolved, mut result) = match state.service.query_cached(&key, req.tilt, orientation).await {
        Ok(pair) => pair,
        Err(err) => return error_response(&err),
    };

    if let Some(area) = req.area_m2 {
        for value in result.monthly_kwh.iter_mut() {
            *value *= area;
        }
        result.annual_kwh *= area;
        result.optimal_annual_kwh *= area;
        let mut scaled = [0.0; 12];
        scaled.copy_from_slice(&result.monthly_kwh);
        let (peak, worst) = MonthValue::peak_and_worst(&scaled);
        result.peak_month = peak;
        result.worst_month = worst;
    }

    let headers = model_headers(resolved.model.data_tier(), resolved.model.confidence_score());
    (StatusCode::OK, headers, Json(result)).into_response()
}

/// GET /api/status
/// Provider health and cache statistics
///
/// Returns the circuit-breaker and rate-limiter state of every provider, the exact-cache
/// size and the proximity store's entry counts by tier and source.
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Service status", body = ServiceStatus)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status().await).into_response()
}

/// POST /api/maintenance/purge
/// Delete expired entries from the proximity store
#[utoipa::path(
    post,
    path = "/api/maintenance/purge",
    responses(
        (status = 200, description = "Number of removed entries"),
        (status = 503, description = "Proximity store unavailable")
    )
)]
pub async fn purge_cache(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.purge_expired().await {
        Ok(removed) => (StatusCode::OK, Json(json!({"removed": removed}))).into_response(),
        Err(err) => error_response(&err),
    }
}
