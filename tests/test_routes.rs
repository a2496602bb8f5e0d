use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use solar_resolver::error::ProviderError;
use solar_resolver::models::radiation::{BoundingBox, Coordinate, ProviderResult};
use solar_resolver::services::cascade::DataSourceCascade;
use solar_resolver::services::exact_cache::MemoryExactCache;
use solar_resolver::services::model_builder::{GridSpec, InterpolationModelBuilder};
use solar_resolver::services::panel_response::IsotropicTranspositionModel;
use solar_resolver::services::providers::{GuardedProvider, SolarProvider};
use solar_resolver::services::proximity_cache::SqliteProximityCache;
use solar_resolver::services::resilience::{GuardSettings, ResilienceGuard};
use solar_resolver::services::solar_data_service::{ServiceSettings, SolarDataService};
use solar_resolver::shared_state::AppState;

macro_rules! assert_approx {
    ($left:expr, $right:expr, $tol:expr) => {
        let (l, r) = ($left as f64, $right as f64);
        assert!(
            (l - r).abs() <= $tol,
            "assert_approx failed: left={}, right={}, diff={}, tol={}",
            l, r, (l - r).abs(), $tol
        );
    };
}

/// Upstream that is always down.
struct DownProvider;

#[async_trait]
impl SolarProvider for DownProvider {
    fn id(&self) -> &str {
        "archive"
    }

    fn priority(&self) -> u32 {
        1
    }

    fn coverage(&self) -> Option<BoundingBox> {
        None
    }

    async fn fetch(&self, _: Coordinate) -> Result<ProviderResult, ProviderError> {
        Err(ProviderError::Status { status: 502, url: "mock://archive".into() })
    }
}

/// Offline state: no upstream providers, so every resolution uses the synthetic fallback.
fn state() -> AppState {
    state_with(Vec::new())
}

fn state_with(providers: Vec<GuardedProvider>) -> AppState {
    let builder = InterpolationModelBuilder::new(
        GridSpec { tilt_step_deg: 15.0, orientation_step_deg: 45.0 },
        Arc::new(IsotropicTranspositionModel::new(0.2)),
        10,
        Duration::from_secs(86_400),
    );
    let proximity = SqliteProximityCache::open_in_memory(30, Duration::from_secs(7 * 86_400)).unwrap();
    AppState::new(SolarDataService::new(
        DataSourceCascade::new(providers, 10),
        builder,
        Arc::new(MemoryExactCache::new(100)),
        Arc::new(proximity),
        ServiceSettings::default(),
    ))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn estimate_sets_model_headers() {
    let app = solar_resolver::app(state());
    let response = app
        .oneshot(post(
            "/api/estimate",
            json!({"lat": 52.52, "lon": 13.405, "area_m2": 10.0, "tilt": 30, "orientation": "S"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-data-tier"], "standard");
    let confidence: f64 = headers["x-confidence-score"].to_str().unwrap().parse().unwrap();
    assert!(confidence > 0.0 && confidence < 0.8);
    assert_eq!(headers["x-request-id"].to_str().unwrap().len(), 36);

    let body = json_body(response).await;
    assert_eq!(body["orientation"], 180.0);
    assert_eq!(body["tilt"], 30.0);
    assert_eq!(body["cache_layer"], "fallback");
    assert_eq!(body["monthly_kwh"].as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn estimate_rejects_bad_input() {
    let state = state();
    for body in [
        json!({"lat": 95.0, "lon": 0.0, "area_m2": 10.0}),
        json!({"lat": 10.0, "lon": 0.0, "area_m2": 0.0}),
        json!({"lat": 10.0, "lon": 0.0, "area_m2": 10.0, "tilt": 120}),
        json!({"lat": 10.0, "lon": 0.0, "area_m2": 10.0, "orientation": "SSE"}),
    ] {
        let response = solar_resolver::app(state.clone()).oneshot(post("/api/estimate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }
}

#[tokio::test]
async fn interpolate_needs_a_resolved_location() {
    let state = state();
    let request = json!({"lat": 40.0, "lon": -3.7, "tilt": 30, "orientation": 180, "area_m2": 2.0});

    let missing = solar_resolver::app(state.clone())
        .oneshot(post("/api/interpolate", request.clone()))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let estimate = solar_resolver::app(state.clone())
        .oneshot(post("/api/estimate", json!({"lat": 40.0, "lon": -3.7, "area_m2": 1.0, "tilt": 30, "orientation": 180})))
        .await
        .unwrap();
    let per_m2 = json_body(estimate).await["annual_kwh"].as_f64().unwrap();

    let found = solar_resolver::app(state.clone())
        .oneshot(post("/api/interpolate", request))
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    assert!(found.headers().contains_key("x-request-id"));
    let body = json_body(found).await;
    assert_approx!(body["annual_kwh"].as_f64().unwrap(), 2.0 * per_m2, 1e-9);

    let auto = solar_resolver::app(state)
        .oneshot(post("/api/interpolate", json!({"lat": 40.0, "lon": -3.7, "tilt": 30, "orientation": "auto"})))
        .await
        .unwrap();
    let body = json_body(auto).await;
    assert_eq!(body["orientation"], body["optimal_orientation"]);
}

#[tokio::test]
async fn status_and_purge() {
    let state = state();
    let status = solar_resolver::app(state.clone())
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let body = json_body(status).await;
    assert_eq!(body["exact_cache_entries"], 0);
    assert_eq!(body["providers"].as_array().unwrap().len(), 0);
    assert_eq!(body["proximity"]["total_entries"], 0);

    let purge = solar_resolver::app(state)
        .oneshot(Request::builder().method("POST").uri("/api/maintenance/purge").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(purge.status(), StatusCode::OK);
    assert_eq!(json_body(purge).await["removed"], 0);
}

#[tokio::test]
async fn metrics_count_requests_and_cache_lookups() {
    let state = state();
    let body = json!({"lat": 45.0, "lon": 7.0, "area_m2": 1.0});
    for _ in 0..2 {
        let response = solar_resolver::app(state.clone()).oneshot(post("/api/estimate", body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let rejected = solar_resolver::app(state.clone())
        .oneshot(post("/api/estimate", json!({"lat": 45.0, "lon": 7.0, "area_m2": -1.0})))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let response = solar_resolver::app(state).oneshot(get("/api/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let requests = body["metrics"]["requests"].as_object().unwrap();
    let (_, estimate) = requests
        .iter()
        .find(|(route, _)| route.starts_with("POST ") && route.ends_with("/estimate"))
        .unwrap();
    assert_eq!(estimate["total"], 3);
    assert_eq!(estimate["errors"], 1);
    assert_eq!(body["metrics"]["cache"]["exact"]["hits"], 1);
    assert_eq!(body["metrics"]["cache"]["exact"]["misses"], 1);
    assert!(body["circuit_breakers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_open_breaker_until_reset() {
    let guard = ResilienceGuard::new("archive", GuardSettings::default());
    let state = state_with(vec![GuardedProvider::new(Arc::new(DownProvider), guard)]);
    for i in 0..5 {
        state.service.resolve(Coordinate::new(10.0 + i as f64, 20.0).unwrap()).await.unwrap();
    }

    let health = json_body(solar_resolver::app(state.clone()).oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["database"], "healthy");
    assert_eq!(health["providers"]["archive"], "circuit_open");

    let metrics = json_body(solar_resolver::app(state.clone()).oneshot(get("/api/metrics")).await.unwrap()).await;
    assert_eq!(metrics["metrics"]["providers"]["archive"]["errors"], 5);
    assert_eq!(metrics["circuit_breakers"][0]["circuit_state"], "OPEN");

    let reset = solar_resolver::app(state.clone())
        .oneshot(Request::builder().method("POST").uri("/api/providers/archive/reset").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::OK);
    let snapshot = json_body(reset).await;
    assert_eq!(snapshot["circuit_state"], "CLOSED");
    assert_eq!(snapshot["consecutive_failures"], 0);

    let health = json_body(solar_resolver::app(state.clone()).oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["providers"]["archive"], "healthy");

    let unknown = solar_resolver::app(state)
        .oneshot(Request::builder().method("POST").uri("/api/providers/nope/reset").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
