use std::sync::Arc;
use std::time::Duration;

use solar_resolver::error::SolarError;
use solar_resolver::models::interpolation::{InterpolationModel, ModelParts};
use solar_resolver::models::radiation::Coordinate;
use solar_resolver::services::interpolation_engine::InterpolationEngine;
use solar_resolver::services::model_builder::{GridSpec, InterpolationModelBuilder};
use solar_resolver::services::panel_response::IsotropicTranspositionModel;
use solar_resolver::services::providers::SyntheticProvider;

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

async fn madrid_model() -> InterpolationModel {
    let madrid = Coordinate::new(40.4168, -3.7038).unwrap();
    let builder = InterpolationModelBuilder::new(
        GridSpec::default(),
        Arc::new(IsotropicTranspositionModel::new(0.22)),
        10,
        Duration::from_secs(86_400),
    );
    builder.build(madrid, SyntheticProvider::new().generate(madrid)).await.unwrap()
}

#[tokio::test]
async fn every_grid_node_is_returned_verbatim() {
    let model = madrid_model().await;
    for (ti, tilt) in model.tilts().iter().enumerate() {
        for (oi, orientation) in model.orientations().iter().enumerate() {
            let result = InterpolationEngine::query(&model, *tilt, *orientation).unwrap();
            assert_eq!(result.annual_kwh.to_bits(), model.annual_at(ti, oi).to_bits());
            assert_eq!(result.monthly_kwh.as_slice(), model.monthly_at(ti, oi).as_slice());
        }
    }
}

#[tokio::test]
async fn between_nodes_stays_within_corner_bounds() {
    let model = madrid_model().await;
    // 32° lies between the 30° and 35° rows, 170° between the 165° and 180° columns.
    let result = InterpolationEngine::query(&model, 32.0, 170.0).unwrap();
    let corners = [
        model.cell(30.0, 165.0).unwrap().1,
        model.cell(30.0, 180.0).unwrap().1,
        model.cell(35.0, 165.0).unwrap().1,
        model.cell(35.0, 180.0).unwrap().1,
    ];
    let lo = corners.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!(result.annual_kwh >= lo - 1e-9 && result.annual_kwh <= hi + 1e-9);
    assert_approx!(result.annual_kwh, result.monthly_kwh.iter().sum::<f64>(), 1e-9);
    assert!(result.efficiency_vs_optimal <= 1.0);
}

#[tokio::test]
async fn orientation_is_continuous_across_north() {
    let model = madrid_model().await;
    let below = InterpolationEngine::query(&model, 20.0, 359.999).unwrap();
    let above = InterpolationEngine::query(&model, 20.0, 0.0).unwrap();
    assert_approx!(below.annual_kwh, above.annual_kwh, 1e-3);

    let wrapped = InterpolationEngine::query(&model, 20.0, 360.0).unwrap();
    assert_eq!(wrapped.orientation, 0.0);
    assert_eq!(wrapped.annual_kwh, above.annual_kwh);
}

#[tokio::test]
async fn south_facing_beats_north_facing_in_the_north() {
    let model = madrid_model().await;
    let south = InterpolationEngine::query(&model, 35.0, 180.0).unwrap();
    let north = InterpolationEngine::query(&model, 35.0, 0.0).unwrap();
    assert!(south.annual_kwh > north.annual_kwh * 1.3);
    assert_eq!(model.optimal_orientation(), 180.0);
    assert!(south.efficiency_vs_optimal > 0.95);
}

#[tokio::test]
async fn stored_model_survives_json_and_rejects_tampering() {
    let model = madrid_model().await;
    let json = serde_json::to_string(&model).unwrap();
    let restored: InterpolationModel = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.tilts(), model.tilts());
    assert_eq!(restored.optimal_orientation(), model.optimal_orientation());
    assert_eq!(restored.data_tier(), model.data_tier());
    assert_approx!(restored.optimal_annual_kwh(), model.optimal_annual_kwh(), 1e-9);

    let mut parts: ModelParts = serde_json::from_str(&json).unwrap();
    parts.optimal_tilt = 0.0;
    parts.optimal_orientation = 0.0;
    parts.optimal_annual_kwh = parts.annual[0];
    assert!(matches!(InterpolationModel::try_from(parts), Err(SolarError::InvalidModel(_))));

    let mut parts: ModelParts = serde_json::from_str(&json).unwrap();
    parts.monthly[3][5] = -1.0;
    assert!(InterpolationModel::try_from(parts).is_err());

    // Axes that no longer start at 0° would make bracketing extrapolate.
    let mut parts: ModelParts = serde_json::from_str(&json).unwrap();
    for orientation in parts.orientations.iter_mut() {
        *orientation += 5.0;
    }
    parts.optimal_orientation += 5.0;
    assert!(matches!(InterpolationModel::try_from(parts), Err(SolarError::InvalidModel(_))));

    let mut parts: ModelParts = serde_json::from_str(&json).unwrap();
    let last = parts.tilts.len() - 1;
    parts.tilts[last] = 89.5;
    assert!(matches!(InterpolationModel::try_from(parts), Err(SolarError::InvalidModel(_))));
}
