use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::radiation::{
    BoundingBox, Coordinate, ProviderResult, RawRadiationSample, Resolution, SamplePeriod,
};
use crate::services::providers::SolarProvider;

const DEFAULT_BASE_URL: &str = "https://re.jrc.ec.europa.eu/api/v5_2";

/// Radiation databases served by PVGIS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiationDatabase {
    Nsrdb,
    Sarah2,
    Era5,
}

impl RadiationDatabase {
    /// Satellite databases where they cover the point, reanalysis elsewhere.
    pub fn for_coordinate(coordinate: Coordinate) -> Self {
        let (lat, lon) = (coordinate.latitude(), coordinate.longitude());
        if -170.0 < lon && lon < -30.0 {
            RadiationDatabase::Nsrdb
        } else if -30.0 < lon && lon < 60.0 && -35.0 < lat && lat < 70.0 {
            RadiationDatabase::Sarah2
        } else {
            RadiationDatabase::Era5
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            RadiationDatabase::Nsrdb => "PVGIS-NSRDB",
            RadiationDatabase::Sarah2 => "PVGIS-SARAH2",
            RadiationDatabase::Era5 => "PVGIS-ERA5",
        }
    }

    pub fn coverage_confidence(&self) -> f64 {
        match self {
            RadiationDatabase::Nsrdb | RadiationDatabase::Sarah2 => 0.85,
            RadiationDatabase::Era5 => 0.7,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PvcalcResponse {
    pub outputs: PvcalcOutputs,
}

#[derive(Debug, Deserialize)]
pub struct PvcalcOutputs {
    pub monthly: PvcalcMonthly,
}

#[derive(Debug, Deserialize)]
pub struct PvcalcMonthly {
    pub fixed: Vec<PvcalcMonth>,
}

#[derive(Debug, Deserialize)]
pub struct PvcalcMonth {
    pub month: u8,
    /// Monthly irradiation on the (horizontal) plane, kWh/m².
    #[serde(rename = "H(i)_m")]
    pub irradiation: Option<f64>,
}

/// Monthly irradiation from the PVGIS PVcalc endpoint, global coverage.
pub struct PvgisProvider {
    id: String,
    priority: u32,
    coverage: Option<BoundingBox>,
    base_url: String,
    client: reqwest::Client,
}

impl PvgisProvider {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            id: config.id.clone(),
            priority: config.priority,
            coverage: config.coverage,
            base_url: config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    fn url(&self, coordinate: Coordinate, database: RadiationDatabase) -> String {
        format!(
            "{}/PVcalc?lat={}&lon={}&peakpower=1&loss=14&angle=0&aspect=0&outputformat=json&raddatabase={}",
            self.base_url,
            coordinate.latitude(),
            coordinate.longitude(),
            database.as_param()
        )
    }

    async fn request(&self, coordinate: Coordinate, database: RadiationDatabase) -> Result<PvcalcResponse, ProviderError> {
        let url = self.url(coordinate, database);
        tracing::debug!(provider = %self.id, %url, "fetching PVcalc");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url,
            });
        }
        response
            .json::<PvcalcResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

pub fn parse_pvcalc_response(
    provider_id: &str,
    database: RadiationDatabase,
    response: PvcalcResponse,
) -> Result<ProviderResult, ProviderError> {
    let samples: Vec<RawRadiationSample> = response
        .outputs
        .monthly
        .fixed
        .iter()
        .filter(|m| (1..=12).contains(&m.month))
        .filter_map(|m| {
            let ghi = m.irradiation.filter(|v| v.is_finite() && *v >= 0.0)?;
            Some(RawRadiationSample {
                period: SamplePeriod::Month(m.month),
                ghi_kwh_m2: ghi,
                dni_kwh_m2: None,
                dhi_kwh_m2: None,
            })
        })
        .collect();

    if samples.is_empty() {
        return Err(ProviderError::Parse("PVcalc response has no monthly irradiation".into()));
    }

    let mut result = ProviderResult {
        provider_id: provider_id.to_string(),
        resolution: Resolution::Monthly,
        samples,
        coverage_confidence: database.coverage_confidence(),
        degraded: false,
    };
    result.degraded = result.month_count() < 12;
    Ok(result)
}

#[async_trait]
impl SolarProvider for PvgisProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn coverage(&self) -> Option<BoundingBox> {
        self.coverage
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<ProviderResult, ProviderError> {
        if let Some(coverage) = self.coverage {
            if !coverage.contains(&coordinate) {
                return Err(ProviderError::OutOfCoverage(self.id.clone()));
            }
        }

        let preferred = RadiationDatabase::for_coordinate(coordinate);
        let (database, body) = match self.request(coordinate, preferred).await {
            Ok(body) => (preferred, body),
            Err(ProviderError::Status { status, .. }) if preferred != RadiationDatabase::Era5 => {
                tracing::warn!(
                    provider = %self.id,
                    status,
                    database = preferred.as_param(),
                    "PVcalc rejected database, retrying with ERA5"
                );
                let body = self.request(coordinate, RadiationDatabase::Era5).await?;
                (RadiationDatabase::Era5, body)
            }
            Err(err) => return Err(err),
        };

        parse_pvcalc_response(&self.id, database, body)
    }
}
