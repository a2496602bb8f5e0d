use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use crate::config::{BuilderConfig, GridConfig};
use crate::error::SolarError;
use crate::models::interpolation::{ANNUAL_TOLERANCE, DataTier, InterpolationModel, ModelParts};
use crate::models::radiation::{Coordinate, ProviderResult, Resolution};
use crate::services::panel_response::PanelResponseModel;

const HIGH_LATITUDE_DEG: f64 = 50.0;
const HIGH_LATITUDE_PENALTY: f64 = 0.9;
const DEGRADED_PENALTY: f64 = 0.9;
const CONFIDENCE_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub tilt_step_deg: f64,
    pub orientation_step_deg: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            tilt_step_deg: 5.0,
            orientation_step_deg: 15.0,
        }
    }
}

impl From<&GridConfig> for GridSpec {
    fn from(config: &GridConfig) -> Self {
        Self {
            tilt_step_deg: config.tilt_step_deg,
            orientation_step_deg: config.orientation_step_deg,
        }
    }
}

impl GridSpec {
    /// 0..=90, always ending on 90.
    pub fn tilts(&self) -> Vec<f64> {
        let step = self.tilt_step_deg.clamp(f64::EPSILON, 90.0);
        let mut tilts: Vec<f64> = (0..)
            .map(|k| k as f64 * step)
            .take_while(|t| *t < 90.0 - 1e-9)
            .collect();
        tilts.push(90.0);
        tilts
    }

    /// 0..360, exclusive.
    pub fn orientations(&self) -> Vec<f64> {
        let step = self.orientation_step_deg.clamp(f64::EPSILON, 180.0);
        (0..)
            .map(|k| k as f64 * step)
            .take_while(|o| *o < 360.0 - 1e-9)
            .collect()
    }
}

/// Deterministic confidence in [0.05, 1], rounded to 3 decimals.
pub fn confidence_score(
    resolution: Resolution,
    coverage_confidence: f64,
    months_present: usize,
    latitude: f64,
    degraded: bool,
) -> f64 {
    let base = match resolution {
        Resolution::Hourly => 0.95,
        Resolution::Monthly => 0.80,
    };
    let completeness = months_present.min(12) as f64 / 12.0;
    let mut score = base * coverage_confidence.clamp(0.0, 1.0) * completeness;
    if latitude.abs() > HIGH_LATITUDE_DEG {
        score *= HIGH_LATITUDE_PENALTY;
    }
    if degraded {
        score *= DEGRADED_PENALTY;
    }
    (score.clamp(CONFIDENCE_FLOOR, 1.0) * 1000.0).round() / 1000.0
}

/// Fills months without data by linear interpolation between the nearest
/// present months, wrapping December to January.
pub fn fill_missing_months(values: &mut [f64; 12], present: &[bool; 12]) {
    if present.iter().all(|p| !p) {
        return;
    }
    for m in 0..12 {
        if present[m] {
            continue;
        }
        let back = (1..12).find(|d| present[(m + 12 - d) % 12]).unwrap_or(1);
        let fwd = (1..12).find(|d| present[(m + d) % 12]).unwrap_or(1);
        let prev = values[(m + 12 - back) % 12];
        let next = values[(m + fwd) % 12];
        values[m] = prev + (next - prev) * back as f64 / (back + fwd) as f64;
    }
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// How far a cell is from the textbook optimum: tilt ≈ |latitude|, facing the equator.
fn preference_distance(tilt: f64, orientation: f64, latitude: f64) -> f64 {
    let expected_tilt = latitude.abs().min(90.0);
    let expected_orientation = if latitude >= 0.0 { 180.0 } else { 0.0 };
    (tilt - expected_tilt).abs() / 90.0 + angular_distance(orientation, expected_orientation) / 180.0
}

/// Index of the annual maximum; near-ties go to the preferred cell.
fn optimum_index(annual: &[f64], tilts: &[f64], orientations: &[f64], latitude: f64) -> usize {
    let max = annual.iter().cloned().fold(f64::MIN, f64::max);
    let tolerance = ANNUAL_TOLERANCE * max.abs().max(1.0);
    let cols = orientations.len();
    let mut best: Option<(usize, f64)> = None;
    for (i, a) in annual.iter().enumerate() {
        if *a < max - tolerance {
            continue;
        }
        let pref = preference_distance(tilts[i / cols], orientations[i % cols], latitude);
        if best.is_none_or(|(_, p)| pref < p) {
            best = Some((i, pref));
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

/// Turns a provider series into a tilt × orientation × month surface.
pub struct InterpolationModelBuilder {
    grid: GridSpec,
    response: Arc<dyn PanelResponseModel>,
    min_months: usize,
    model_ttl: Duration,
}

impl InterpolationModelBuilder {
    pub fn new(grid: GridSpec, response: Arc<dyn PanelResponseModel>, min_months: usize, model_ttl: Duration) -> Self {
        Self {
            grid,
            response,
            min_months: min_months.clamp(1, 12),
            model_ttl,
        }
    }

    pub fn from_config(
        grid: &GridConfig,
        builder: &BuilderConfig,
        response: Arc<dyn PanelResponseModel>,
        model_ttl: Duration,
    ) -> Self {
        Self::new(GridSpec::from(grid), response, builder.min_months, model_ttl)
    }

    pub fn grid(&self) -> GridSpec {
        self.grid
    }

    pub async fn build(&self, coordinate: Coordinate, result: ProviderResult) -> Result<InterpolationModel, SolarError> {
        let present = result.months_present();
        let months = present.iter().filter(|p| **p).count();
        if months < self.min_months {
            return Err(SolarError::InsufficientData {
                provider: result.provider_id,
                months,
                required: self.min_months,
            });
        }

        let tilts = self.grid.tilts();
        let orientations = Arc::new(self.grid.orientations());
        let sample_count = result.samples.len();
        let samples = Arc::new(result.samples);

        let rows = tilts.iter().map(|&tilt| {
            let samples = samples.clone();
            let orientations = orientations.clone();
            let response = self.response.clone();
            tokio::task::spawn_blocking(move || {
                orientations
                    .iter()
                    .map(|&orientation| response.convert(&samples, coordinate, tilt, orientation))
                    .collect::<Vec<[f64; 12]>>()
            })
        });

        let mut monthly = Vec::with_capacity(tilts.len() * orientations.len());
        for row in join_all(rows).await {
            let row = row.map_err(|e| SolarError::InvalidModel(format!("grid worker failed: {e}")))?;
            monthly.extend(row);
        }

        let degraded = result.degraded || months < 12;
        if months < 12 {
            for cell in monthly.iter_mut() {
                fill_missing_months(cell, &present);
            }
        }
        let annual: Vec<f64> = monthly.iter().map(|m| m.iter().sum()).collect();

        let best = optimum_index(&annual, &tilts, &orientations, coordinate.latitude());
        let cols = orientations.len();
        let confidence = confidence_score(
            result.resolution,
            result.coverage_confidence,
            months,
            coordinate.latitude(),
            degraded,
        );

        let model = InterpolationModel::try_from(ModelParts {
            coordinate,
            optimal_tilt: tilts[best / cols],
            optimal_orientation: orientations[best % cols],
            optimal_annual_kwh: annual[best],
            tilts,
            orientations: (*orientations).clone(),
            monthly,
            annual,
            data_tier: DataTier::classify(result.resolution, result.coverage_confidence),
            confidence_score: confidence,
            source_provider_id: result.provider_id,
            resolution: result.resolution,
            sample_count,
            built_at: Utc::now(),
            ttl_secs: self.model_ttl.as_secs(),
        })?;

        tracing::debug!(
            source = model.source_provider_id(),
            tier = %model.data_tier(),
            confidence = model.confidence_score(),
            optimal_tilt = model.optimal_tilt(),
            optimal_orientation = model.optimal_orientation(),
            degraded,
            "interpolation model built"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::radiation::{RawRadiationSample, SamplePeriod};
    use crate::services::panel_response::IsotropicTranspositionModel;
    use crate::services::providers::SyntheticProvider;

    struct FlatResponse;

    impl PanelResponseModel for FlatResponse {
        fn convert(&self, samples: &[RawRadiationSample], _: Coordinate, _: f64, _: f64) -> [f64; 12] {
            let mut out = [0.0; 12];
            for s in samples {
                out[(s.period.month() - 1) as usize] += s.ghi_kwh_m2;
            }
            out
        }
    }

    fn builder(response: Arc<dyn PanelResponseModel>) -> InterpolationModelBuilder {
        InterpolationModelBuilder::new(GridSpec::default(), response, 10, Duration::from_secs(86_400))
    }

    fn monthly_result(months: &[u8], coverage: f64) -> ProviderResult {
        ProviderResult {
            provider_id: "stub".into(),
            resolution: Resolution::Monthly,
            samples: months
                .iter()
                .map(|m| RawRadiationSample {
                    period: SamplePeriod::Month(*m),
                    ghi_kwh_m2: 10.0 * *m as f64,
                    dni_kwh_m2: None,
                    dhi_kwh_m2: None,
                })
                .collect(),
            coverage_confidence: coverage,
            degraded: false,
        }
    }

    #[test]
    fn default_grid_axes() {
        let grid = GridSpec::default();
        let tilts = grid.tilts();
        assert_eq!(tilts.len(), 19);
        assert_eq!(tilts[0], 0.0);
        assert_eq!(tilts[18], 90.0);
        let orientations = grid.orientations();
        assert_eq!(orientations.len(), 24);
        assert_eq!(orientations[23], 345.0);

        let odd = GridSpec { tilt_step_deg: 7.0, orientation_step_deg: 50.0 };
        assert_eq!(odd.tilts().last(), Some(&90.0));
        assert_eq!(odd.tilts()[12], 84.0);
        assert_eq!(odd.orientations().len(), 8);
    }

    #[test]
    fn confidence_formula() {
        assert_eq!(confidence_score(Resolution::Hourly, 0.9, 12, 48.85, false), 0.855);
        assert_eq!(confidence_score(Resolution::Monthly, 0.35, 12, 52.52, false), 0.252);
        assert_eq!(confidence_score(Resolution::Monthly, 0.85, 11, 40.0, true), 0.561);
        assert_eq!(confidence_score(Resolution::Monthly, 0.0, 12, 0.0, false), 0.05);
    }

    #[test]
    fn cyclic_fill_wraps_year_end() {
        let mut values = [0.0; 12];
        let mut present = [true; 12];
        for (i, v) in values.iter_mut().enumerate() {
            *v = 10.0 * (i + 1) as f64;
        }
        present[0] = false;
        values[0] = 0.0;
        fill_missing_months(&mut values, &present);
        // Between December (120) and February (20).
        assert_eq!(values[0], 70.0);

        let mut values = [5.0, 0.0, 0.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0];
        let mut present = [true; 12];
        present[1] = false;
        present[2] = false;
        fill_missing_months(&mut values, &present);
        assert_eq!(values[1], 10.0);
        assert_eq!(values[2], 15.0);
    }

    #[tokio::test]
    async fn flat_response_ties_resolve_toward_equator() {
        let b = builder(Arc::new(FlatResponse));
        let all: Vec<u8> = (1..=12).collect();

        let north = b.build(Coordinate::new(52.52, 13.4).unwrap(), monthly_result(&all, 0.8)).await.unwrap();
        assert_eq!(north.optimal_tilt(), 55.0);
        assert_eq!(north.optimal_orientation(), 180.0);

        let south = b.build(Coordinate::new(-33.9, 18.4).unwrap(), monthly_result(&all, 0.8)).await.unwrap();
        assert_eq!(south.optimal_tilt(), 35.0);
        assert_eq!(south.optimal_orientation(), 0.0);
    }

    #[tokio::test]
    async fn rejects_too_few_months() {
        let b = builder(Arc::new(FlatResponse));
        let err = b
            .build(Coordinate::new(0.0, 0.0).unwrap(), monthly_result(&[1, 2, 3, 4, 5, 6, 7, 8, 9], 0.8))
            .await
            .unwrap_err();
        assert!(matches!(err, SolarError::InsufficientData { months: 9, required: 10, .. }));
    }

    #[tokio::test]
    async fn eleven_months_are_filled_and_degraded() {
        let b = builder(Arc::new(FlatResponse));
        let months: Vec<u8> = (1..=12).filter(|m| *m != 7).collect();
        let model = b.build(Coordinate::new(10.0, 0.0).unwrap(), monthly_result(&months, 0.85)).await.unwrap();
        let (monthly, annual) = model.cell(0.0, 0.0).unwrap();
        assert_eq!(monthly[6], 70.0);
        assert!((annual - 780.0).abs() < 1e-9);
        assert_eq!(model.confidence_score(), 0.561);
    }

    #[tokio::test]
    async fn synthetic_berlin_model_shape() {
        let berlin = Coordinate::new(52.52, 13.405).unwrap();
        let b = builder(Arc::new(IsotropicTranspositionModel::new(0.22)));
        let model = b.build(berlin, SyntheticProvider::new().generate(berlin)).await.unwrap();

        assert_eq!(model.tilts().len(), 19);
        assert_eq!(model.orientations().len(), 24);
        assert_eq!(model.data_tier(), DataTier::Standard);
        assert_eq!(model.confidence_score(), 0.252);
        assert_eq!(model.optimal_orientation(), 180.0);
        assert!((25.0..=55.0).contains(&model.optimal_tilt()), "tilt {}", model.optimal_tilt());
        let (_, flat) = model.cell(0.0, 0.0).unwrap();
        assert!(model.optimal_annual_kwh() > flat);
    }
}
