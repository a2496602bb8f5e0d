use utoipa::OpenApi;
use crate::controllers::{estimate_controller, monitoring_controller};
use crate::models::{estimate, interpolation, radiation};
use crate::services::{metrics, proximity_cache, resilience, solar_data_service};

#[derive(OpenApi)]
#[openapi(
    paths(
        estimate_controller::create_estimate,
        estimate_controller::interpolate,
        estimate_controller::get_status,
        estimate_controller::purge_cache,
        monitoring_controller::get_health,
        monitoring_controller::get_metrics,
        monitoring_controller::reset_provider
    ),
    components(
        schemas(
            estimate::EstimateRequest,
            estimate::InterpolateRequest,
            estimate::OrientationInput,
            estimate::EstimateResult,
            estimate::CacheLayer,
            estimate::Savings,
            interpolation::InterpolationResult,
            interpolation::MonthValue,
            interpolation::DataTier,
            radiation::Coordinate,
            resilience::ResilienceSnapshot,
            resilience::CircuitState,
            proximity_cache::ProximityStats,
            solar_data_service::ServiceStatus,
            solar_data_service::HealthState,
            solar_data_service::HealthReport,
            solar_data_service::MetricsReport,
            metrics::MetricsSnapshot,
            metrics::RequestStats,
            metrics::ProviderCallStats,
            metrics::CacheTierStats
        )
    ),
    tags(
        (name = "solar-resolver", description = "Solar Data Resolution & Interpolation API")
    )
)]
pub struct ApiDoc;
