use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::radiation::{
    BoundingBox, Coordinate, ProviderResult, RawRadiationSample, Resolution, SamplePeriod,
};
use crate::services::providers::SolarProvider;

const DEFAULT_BASE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const HOURLY_FIELDS: &str = "shortwave_radiation,direct_normal_irradiance,diffuse_radiation";
const MIN_ROW_FRACTION: f64 = 0.95;

#[derive(Debug, Deserialize)]
pub struct ArchiveResponse {
    pub hourly: ArchiveHourly,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveHourly {
    pub time: Vec<String>,
    pub shortwave_radiation: Vec<Option<f64>>,
    #[serde(default)]
    pub direct_normal_irradiance: Vec<Option<f64>>,
    #[serde(default)]
    pub diffuse_radiation: Vec<Option<f64>>,
}

/// Hourly reanalysis archive from the Open-Meteo API family.
pub struct OpenMeteoArchiveProvider {
    id: String,
    priority: u32,
    coverage: Option<BoundingBox>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenMeteoArchiveProvider {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            id: config.id.clone(),
            priority: config.priority,
            coverage: config.coverage,
            base_url: config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    fn url(&self, coordinate: Coordinate, year: i32) -> String {
        format!(
            "{}?latitude={}&longitude={}&start_date={year}-01-01&end_date={year}-12-31&hourly={HOURLY_FIELDS}&timezone=GMT",
            self.base_url,
            coordinate.latitude(),
            coordinate.longitude(),
        )
    }
}

fn coverage_confidence(coordinate: Coordinate) -> f64 {
    if coordinate.latitude().abs() <= 60.0 { 0.9 } else { 0.7 }
}

fn hours_in_year(year: i32) -> usize {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() { 8784 } else { 8760 }
}

/// Open-Meteo stamps "2025-12-28T10:00"; radiation values are the mean of the preceding hour.
fn hour_start(stamp: &str) -> Result<DateTime<Utc>, ProviderError> {
    let end = format!("{stamp}:00Z")
        .parse::<DateTime<Utc>>()
        .map_err(|e| ProviderError::Parse(format!("bad timestamp '{stamp}': {e}")))?;
    Ok(end - ChronoDuration::hours(1))
}

fn wh_to_kwh(value: Option<&Option<f64>>) -> Option<f64> {
    value.copied().flatten().filter(|v| v.is_finite()).map(|v| v.max(0.0) / 1000.0)
}

/// Converts an archive payload into hourly samples for `year`.
pub fn parse_archive_response(
    provider_id: &str,
    coordinate: Coordinate,
    year: i32,
    response: ArchiveResponse,
) -> Result<ProviderResult, ProviderError> {
    let hourly = response.hourly;
    if hourly.time.len() != hourly.shortwave_radiation.len() {
        return Err(ProviderError::Parse(format!(
            "{} timestamps but {} radiation values",
            hourly.time.len(),
            hourly.shortwave_radiation.len()
        )));
    }

    let mut samples = Vec::with_capacity(hourly.time.len());
    for (i, stamp) in hourly.time.iter().enumerate() {
        let Some(ghi) = wh_to_kwh(hourly.shortwave_radiation.get(i)) else {
            continue;
        };
        let start = hour_start(stamp)?;
        if start.year() != year {
            continue;
        }
        samples.push(RawRadiationSample {
            period: SamplePeriod::Hour(start),
            ghi_kwh_m2: ghi,
            dni_kwh_m2: wh_to_kwh(hourly.direct_normal_irradiance.get(i)),
            dhi_kwh_m2: wh_to_kwh(hourly.diffuse_radiation.get(i)),
        });
    }

    let mut result = ProviderResult {
        provider_id: provider_id.to_string(),
        resolution: Resolution::Hourly,
        samples,
        coverage_confidence: coverage_confidence(coordinate),
        degraded: false,
    };
    let expected = hours_in_year(year) as f64;
    result.degraded =
        (result.samples.len() as f64) < expected * MIN_ROW_FRACTION || result.month_count() < 12;
    Ok(result)
}

#[async_trait]
impl SolarProvider for OpenMeteoArchiveProvider {
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
        let year = Utc::now().year() - 1;
        let url = self.url(coordinate, year);
        tracing::debug!(provider = %self.id, %url, "fetching hourly archive");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body: ArchiveResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let result = parse_archive_response(&self.id, coordinate, year, body)?;
        tracing::info!(
            provider = %self.id,
            samples = result.samples.len(),
            degraded = result.degraded,
            "hourly archive received"
        );
        Ok(result)
    }
}
