use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::SolarError;
use crate::models::radiation::{Coordinate, MONTH_NAMES, Resolution};

/// Relative tolerance used when comparing annual sums.
pub const ANNUAL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DataTier {
    Standard,
    Engineering,
}

impl DataTier {
    pub fn classify(resolution: Resolution, coverage_confidence: f64) -> Self {
        if resolution == Resolution::Hourly && coverage_confidence >= 0.8 {
            DataTier::Engineering
        } else {
            DataTier::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataTier::Standard => "standard",
            DataTier::Engineering => "engineering",
        }
    }
}

impl fmt::Display for DataTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataTier {
    type Err = SolarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(DataTier::Standard),
            "engineering" => Ok(DataTier::Engineering),
            other => Err(SolarError::InvalidModel(format!("unknown data tier {other}"))),
        }
    }
}

/// Unvalidated model contents, as produced by the builder or read back from storage.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelParts {
    pub coordinate: Coordinate,
    pub tilts: Vec<f64>,
    pub orientations: Vec<f64>,
    pub monthly: Vec<[f64; 12]>,
    pub annual: Vec<f64>,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
    pub optimal_annual_kwh: f64,
    pub data_tier: DataTier,
    pub confidence_score: f64,
    pub source_provider_id: String,
    pub resolution: Resolution,
    pub sample_count: usize,
    pub built_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// Tilt × orientation × month generation surface for one location, in kWh per m².
///
/// Cells are stored row-major: index = tilt_index * orientations.len() + orientation_index.
/// Construction goes through [`TryFrom<ModelParts>`], which enforces the grid
/// dimensions, non-negative finite cells and that the stored optimum is the argmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelParts")]
pub struct InterpolationModel {
    coordinate: Coordinate,
    tilts: Vec<f64>,
    orientations: Vec<f64>,
    monthly: Vec<[f64; 12]>,
    annual: Vec<f64>,
    optimal_tilt: f64,
    optimal_orientation: f64,
    optimal_annual_kwh: f64,
    data_tier: DataTier,
    confidence_score: f64,
    source_provider_id: String,
    resolution: Resolution,
    sample_count: usize,
    built_at: DateTime<Utc>,
    ttl_secs: u64,
}

fn strictly_increasing(axis: &[f64]) -> bool {
    axis.windows(2).all(|w| w[0] < w[1])
}

impl TryFrom<ModelParts> for InterpolationModel {
    type Error = SolarError;

    fn try_from(parts: ModelParts) -> Result<Self, Self::Error> {
        let invalid = |msg: String| Err(SolarError::InvalidModel(msg));

        if parts.tilts.is_empty() || parts.orientations.is_empty() {
            return invalid("empty grid axis".into());
        }
        if !strictly_increasing(&parts.tilts) || !strictly_increasing(&parts.orientations) {
            return invalid("grid axes must be strictly increasing".into());
        }
        let tilts_ok = parts.tilts.iter().all(|t| (0.0..=90.0).contains(t));
        let orientations_ok = parts.orientations.iter().all(|o| (0.0..360.0).contains(o));
        if !tilts_ok || !orientations_ok {
            return invalid("grid axis value out of range".into());
        }
        // Queries never extrapolate: tilt spans 0..=90 and orientation starts at north.
        if parts.tilts.first() != Some(&0.0) || parts.tilts.last() != Some(&90.0) {
            return invalid("tilt axis must span 0 to 90 degrees".into());
        }
        if parts.orientations.first() != Some(&0.0) {
            return invalid("orientation axis must start at 0 degrees".into());
        }

        let cells = parts.tilts.len() * parts.orientations.len();
        if parts.monthly.len() != cells || parts.annual.len() != cells {
            return invalid(format!(
                "expected {cells} cells, got {} monthly / {} annual",
                parts.monthly.len(),
                parts.annual.len()
            ));
        }

        for (idx, (months, annual)) in parts.monthly.iter().zip(&parts.annual).enumerate() {
            if months.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return invalid(format!("cell {idx} has a negative or non-finite month"));
            }
            let sum: f64 = months.iter().sum();
            if !annual.is_finite() || (sum - annual).abs() > ANNUAL_TOLERANCE * sum.abs().max(1.0) {
                return invalid(format!("cell {idx} annual {annual} does not match monthly sum {sum}"));
            }
        }

        let Some(ti) = parts.tilts.iter().position(|t| *t == parts.optimal_tilt) else {
            return invalid(format!("optimal tilt {} is not a grid node", parts.optimal_tilt));
        };
        let Some(oi) = parts.orientations.iter().position(|o| *o == parts.optimal_orientation) else {
            return invalid(format!(
                "optimal orientation {} is not a grid node",
                parts.optimal_orientation
            ));
        };
        let at_optimum = parts.annual[ti * parts.orientations.len() + oi];
        if at_optimum != parts.optimal_annual_kwh {
            return invalid("optimal annual does not match its cell".into());
        }
        let limit = at_optimum + ANNUAL_TOLERANCE * at_optimum.abs().max(1.0);
        if parts.annual.iter().any(|a| *a > limit) {
            return invalid("stored optimum is not the annual maximum".into());
        }

        if !(0.0..=1.0).contains(&parts.confidence_score) {
            return invalid(format!("confidence {} outside [0, 1]", parts.confidence_score));
        }

        Ok(Self {
            coordinate: parts.coordinate,
            tilts: parts.tilts,
            orientations: parts.orientations,
            monthly: parts.monthly,
            annual: parts.annual,
            optimal_tilt: parts.optimal_tilt,
            optimal_orientation: parts.optimal_orientation,
            optimal_annual_kwh: parts.optimal_annual_kwh,
            data_tier: parts.data_tier,
            confidence_score: parts.confidence_score,
            source_provider_id: parts.source_provider_id,
            resolution: parts.resolution,
            sample_count: parts.sample_count,
            built_at: parts.built_at,
            ttl_secs: parts.ttl_secs,
        })
    }
}

impl InterpolationModel {
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn tilts(&self) -> &[f64] {
        &self.tilts
    }

    pub fn orientations(&self) -> &[f64] {
        &self.orientations
    }

    fn index(&self, tilt_idx: usize, orientation_idx: usize) -> usize {
        tilt_idx * self.orientations.len() + orientation_idx
    }

    /// Monthly kWh/m² at a grid node. Panics on out-of-range indices, like slice indexing.
    pub fn monthly_at(&self, tilt_idx: usize, orientation_idx: usize) -> &[f64; 12] {
        &self.monthly[self.index(tilt_idx, orientation_idx)]
    }

    pub fn annual_at(&self, tilt_idx: usize, orientation_idx: usize) -> f64 {
        self.annual[self.index(tilt_idx, orientation_idx)]
    }

    /// Grid node lookup by axis values.
    pub fn cell(&self, tilt: f64, orientation: f64) -> Option<(&[f64; 12], f64)> {
        let ti = self.tilts.iter().position(|t| *t == tilt)?;
        let oi = self.orientations.iter().position(|o| *o == orientation)?;
        Some((self.monthly_at(ti, oi), self.annual_at(ti, oi)))
    }

    pub fn optimal_tilt(&self) -> f64 {
        self.optimal_tilt
    }

    pub fn optimal_orientation(&self) -> f64 {
        self.optimal_orientation
    }

    pub fn optimal_annual_kwh(&self) -> f64 {
        self.optimal_annual_kwh
    }

    pub fn data_tier(&self) -> DataTier {
        self.data_tier
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn source_provider_id(&self) -> &str {
        &self.source_provider_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthValue {
    pub month: String,
    pub kwh: f64,
}

impl MonthValue {
    /// Highest and lowest month; the earliest month wins ties.
    pub fn peak_and_worst(monthly: &[f64; 12]) -> (MonthValue, MonthValue) {
        let mut peak = 0;
        let mut worst = 0;
        for (i, v) in monthly.iter().enumerate() {
            if *v > monthly[peak] {
                peak = i;
            }
            if *v < monthly[worst] {
                worst = i;
            }
        }
        (
            MonthValue { month: MONTH_NAMES[peak].to_string(), kwh: monthly[peak] },
            MonthValue { month: MONTH_NAMES[worst].to_string(), kwh: monthly[worst] },
        )
    }
}

/// Output of one interpolation query, per m² of panel.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct InterpolationResult {
    pub tilt: f64,
    pub orientation: f64,
    pub annual_kwh: f64,
    /// January first.
    pub monthly_kwh: Vec<f64>,
    pub efficiency_vs_optimal: f64,
    pub peak_month: MonthValue,
    pub worst_month: MonthValue,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
    pub optimal_annual_kwh: f64,
}
