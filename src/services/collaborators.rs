use async_trait::async_trait;
use serde::Serialize;

use crate::models::estimate::Savings;
use crate::models::interpolation::{DataTier, InterpolationModel, MonthValue};
use crate::models::radiation::Coordinate;

/// Facts about a resolved model handed to a narrative generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub location: Coordinate,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
    pub optimal_annual_kwh_per_m2: f64,
    pub peak_month: MonthValue,
    pub worst_month: MonthValue,
    pub data_tier: DataTier,
    pub confidence_score: f64,
    pub source_provider_id: String,
}

impl From<&InterpolationModel> for ModelSummary {
    fn from(model: &InterpolationModel) -> Self {
        let optimum = model
            .cell(model.optimal_tilt(), model.optimal_orientation())
            .map(|(monthly, _)| *monthly)
            .unwrap_or([0.0; 12]);
        let (peak_month, worst_month) = MonthValue::peak_and_worst(&optimum);
        Self {
            location: model.coordinate(),
            optimal_tilt: model.optimal_tilt(),
            optimal_orientation: model.optimal_orientation(),
            optimal_annual_kwh_per_m2: model.optimal_annual_kwh(),
            peak_month,
            worst_month,
            data_tier: model.data_tier(),
            confidence_score: model.confidence_score(),
            source_provider_id: model.source_provider_id().to_string(),
        }
    }
}

/// Produces a human-readable explanation of a model. Optional; resolution never waits on it
/// beyond the configured narrative timeout.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn narrate(&self, summary: &ModelSummary) -> anyhow::Result<String>;
}

/// Country-specific tariff or incentive calculation.
pub trait RegulatoryPlugin: Send + Sync {
    /// `None` when the plugin has nothing to say for this country.
    fn savings(&self, annual_kwh: f64, country_code: Option<&str>) -> Option<Savings>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interpolation::fixtures::small_model;

    #[test]
    fn summary_reports_optimum_months() {
        let model = small_model();
        let summary = ModelSummary::from(&model);
        assert_eq!(summary.optimal_tilt, 90.0);
        assert_eq!(summary.optimal_orientation, 180.0);
        assert_eq!(summary.peak_month.month, "December");
        assert_eq!(summary.worst_month.month, "January");
        assert_eq!(summary.optimal_annual_kwh_per_m2, model.optimal_annual_kwh());
    }
}
