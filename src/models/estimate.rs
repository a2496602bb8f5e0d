use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::interpolation::{DataTier, MonthValue};
use crate::models::radiation::Coordinate;

/// Layer that answered a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayer {
    Exact,
    Proximity,
    Fresh,
    Fallback,
}

/// Panel azimuth as degrees or a compass point ("N", "SE", ..., or "auto" for the optimum).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum OrientationInput {
    Degrees(f64),
    Named(String),
}

impl OrientationInput {
    /// Degrees clockwise from north, or `None` for "auto".
    pub fn to_degrees(&self) -> Result<Option<f64>, String> {
        match self {
            OrientationInput::Degrees(d) => Ok(Some(*d)),
            OrientationInput::Named(name) => {
                let degrees = match name.trim().to_ascii_uppercase().as_str() {
                    "AUTO" => return Ok(None),
                    "N" => 0.0,
                    "NE" => 45.0,
                    "E" => 90.0,
                    "SE" => 135.0,
                    "S" => 180.0,
                    "SW" => 225.0,
                    "W" => 270.0,
                    "NW" => 315.0,
                    other => return Err(format!("unknown orientation '{other}'")),
                };
                Ok(Some(degrees))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EstimateRequest {
    pub lat: f64,
    pub lon: f64,
    pub area_m2: f64,
    pub tilt: Option<f64>,
    pub orientation: Option<OrientationInput>,
    /// ISO country code passed to the regulatory plugin, when one is configured.
    pub country_code: Option<String>,
    /// Ask the configured narrative generator for a plain-language summary.
    #[serde(default)]
    pub include_narrative: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InterpolateRequest {
    pub lat: f64,
    pub lon: f64,
    pub tilt: f64,
    pub orientation: OrientationInput,
    pub area_m2: Option<f64>,
}

/// Estimate parameters after orientation names have been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub area_m2: f64,
    pub tilt: Option<f64>,
    pub orientation: Option<f64>,
    pub country_code: Option<String>,
    pub include_narrative: bool,
}

impl EstimateQuery {
    pub fn new(latitude: f64, longitude: f64, area_m2: f64) -> Self {
        Self {
            latitude,
            longitude,
            area_m2,
            tilt: None,
            orientation: None,
            country_code: None,
            include_narrative: false,
        }
    }

    pub fn with_panel(mut self, tilt: f64, orientation: f64) -> Self {
        self.tilt = Some(tilt);
        self.orientation = Some(orientation);
        self
    }
}

/// Savings reported by a regulatory plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Savings {
    pub annual_savings: f64,
    pub currency: String,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EstimateResult {
    pub location: Coordinate,
    pub area_m2: f64,
    pub tilt: f64,
    pub orientation: f64,
    pub annual_kwh: f64,
    pub monthly_kwh: Vec<f64>,
    pub peak_month: MonthValue,
    pub worst_month: MonthValue,
    pub efficiency_vs_optimal: f64,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
    pub optimal_annual_kwh: f64,
    pub data_tier: DataTier,
    pub confidence_score: f64,
    pub source_provider_id: String,
    pub cache_layer: CacheLayer,
    pub distance_km: Option<f64>,
    pub savings: Option<Savings>,
    /// Present only when requested and a narrative generator answered in time.
    pub narrative: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinal_orientations() {
        let named = |s: &str| OrientationInput::Named(s.into()).to_degrees();
        assert_eq!(named("S"), Ok(Some(180.0)));
        assert_eq!(named("nw"), Ok(Some(315.0)));
        assert_eq!(named(" E "), Ok(Some(90.0)));
        assert_eq!(named("auto"), Ok(None));
        assert!(named("SSE").is_err());
        assert_eq!(OrientationInput::Degrees(200.0).to_degrees(), Ok(Some(200.0)));
    }

    #[test]
    fn request_accepts_number_or_name() {
        let req: EstimateRequest =
            serde_json::from_str(r#"{"lat": 1.0, "lon": 2.0, "area_m2": 10.0, "orientation": "SW"}"#).unwrap();
        assert_eq!(req.orientation, Some(OrientationInput::Named("SW".into())));
        assert_eq!(req.tilt, None);

        let req: InterpolateRequest =
            serde_json::from_str(r#"{"lat": 1.0, "lon": 2.0, "tilt": 30, "orientation": 135}"#).unwrap();
        assert_eq!(req.orientation, OrientationInput::Degrees(135.0));
        assert_eq!(req.area_m2, None);
    }
}
