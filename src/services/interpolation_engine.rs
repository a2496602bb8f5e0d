use crate::error::SolarError;
use crate::models::interpolation::{InterpolationModel, InterpolationResult, MonthValue};

/// Position of a query value between two grid nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bracket {
    lower: usize,
    upper: usize,
    /// 0.0 at `lower`, 1.0 at `upper`.
    fraction: f64,
}

impl Bracket {
    fn on_node(&self) -> bool {
        self.fraction == 0.0
    }
}

/// Tilt axis: clamps to the last node (90°).
fn bracket_linear(axis: &[f64], value: f64) -> Bracket {
    let below = axis.partition_point(|a| *a <= value);
    let lower = below.saturating_sub(1);
    if lower + 1 >= axis.len() {
        return Bracket { lower, upper: lower, fraction: 0.0 };
    }
    let upper = lower + 1;
    let fraction = (value - axis[lower]) / (axis[upper] - axis[lower]);
    Bracket { lower, upper, fraction }
}

/// Orientation axis: the last node brackets with the first one at +360°.
fn bracket_cyclic(axis: &[f64], value: f64) -> Bracket {
    let below = axis.partition_point(|a| *a <= value);
    let lower = below.saturating_sub(1);
    let (upper, upper_value) = if lower + 1 >= axis.len() {
        (0, axis[0] + 360.0)
    } else {
        (lower + 1, axis[lower + 1])
    };
    let span = upper_value - axis[lower];
    let fraction = if span > 0.0 { (value - axis[lower]) / span } else { 0.0 };
    Bracket { lower, upper, fraction }
}

/// Checks tilt ∈ [0, 90] and orientation ∈ [0, 360]; 360 is folded onto 0.
pub fn validate_geometry(tilt: f64, orientation: f64) -> Result<(f64, f64), SolarError> {
    let valid = tilt.is_finite()
        && orientation.is_finite()
        && (0.0..=90.0).contains(&tilt)
        && (0.0..=360.0).contains(&orientation);
    if !valid {
        return Err(SolarError::InvalidPanelGeometry { tilt, orientation });
    }
    let orientation = if orientation == 360.0 { 0.0 } else { orientation };
    Ok((tilt, orientation))
}

/// Answers tilt/orientation queries against a cached model.
///
/// Pure and allocation-light; identical inputs give bit-identical results.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationEngine;

impl InterpolationEngine {
    pub fn query(model: &InterpolationModel, tilt: f64, orientation: f64) -> Result<InterpolationResult, SolarError> {
        let (tilt, orientation) = validate_geometry(tilt, orientation)?;
        let t = bracket_linear(model.tilts(), tilt);
        let o = bracket_cyclic(model.orientations(), orientation);

        let (monthly, annual) = if t.on_node() && o.on_node() {
            (*model.monthly_at(t.lower, o.lower), model.annual_at(t.lower, o.lower))
        } else {
            let q00 = model.monthly_at(t.lower, o.lower);
            let q01 = model.monthly_at(t.lower, o.upper);
            let q10 = model.monthly_at(t.upper, o.lower);
            let q11 = model.monthly_at(t.upper, o.upper);
            let (ft, fo) = (t.fraction, o.fraction);

            let mut monthly = [0.0; 12];
            for (m, value) in monthly.iter_mut().enumerate() {
                *value = q00[m] * (1.0 - ft) * (1.0 - fo)
                    + q01[m] * (1.0 - ft) * fo
                    + q10[m] * ft * (1.0 - fo)
                    + q11[m] * ft * fo;
            }
            (monthly, monthly.iter().sum())
        };

        let optimal = model.optimal_annual_kwh();
        let efficiency_vs_optimal = if optimal > 0.0 { annual / optimal } else { 0.0 };
        let (peak_month, worst_month) = MonthValue::peak_and_worst(&monthly);

        Ok(InterpolationResult {
            tilt,
            orientation,
            annual_kwh: annual,
            monthly_kwh: monthly.to_vec(),
            efficiency_vs_optimal,
            peak_month,
            worst_month,
            optimal_tilt: model.optimal_tilt(),
            optimal_orientation: model.optimal_orientation(),
            optimal_annual_kwh: optimal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interpolation::fixtures::small_model;

    #[test]
    fn grid_nodes_are_exact() {
        let model = small_model();
        for (ti, t) in model.tilts().iter().enumerate() {
            for (oi, o) in model.orientations().iter().enumerate() {
                let r = InterpolationEngine::query(&model, *t, *o).unwrap();
                assert_eq!(r.annual_kwh, model.annual_at(ti, oi));
                assert_eq!(r.monthly_kwh.as_slice(), model.monthly_at(ti, oi).as_slice());
            }
        }
    }

    #[test]
    fn optimum_has_full_efficiency() {
        let model = small_model();
        let r = InterpolationEngine::query(&model, model.optimal_tilt(), model.optimal_orientation()).unwrap();
        assert_eq!(r.efficiency_vs_optimal, 1.0);
        assert_eq!(r.peak_month.month, "December");
        assert_eq!(r.worst_month.month, "January");
    }

    #[test]
    fn bilinear_midpoint() {
        let model = small_model();
        let r = InterpolationEngine::query(&model, 22.5, 45.0).unwrap();
        let corners = [
            model.annual_at(0, 0),
            model.annual_at(0, 1),
            model.annual_at(1, 0),
            model.annual_at(1, 1),
        ];
        let expected = corners.iter().sum::<f64>() / 4.0;
        assert!((r.annual_kwh - expected).abs() < 1e-9);
        assert!((r.annual_kwh - r.monthly_kwh.iter().sum::<f64>()).abs() < 1e-12);
        assert!(r.efficiency_vs_optimal < 1.0);
    }

    #[test]
    fn orientation_wraps_past_last_column() {
        let model = small_model();
        // Halfway between 270 and 360 (= column 0).
        let r = InterpolationEngine::query(&model, 0.0, 315.0).unwrap();
        let expected = (model.annual_at(0, 3) + model.annual_at(0, 0)) / 2.0;
        assert!((r.annual_kwh - expected).abs() < 1e-9);

        let wrapped = InterpolationEngine::query(&model, 45.0, 360.0).unwrap();
        let zero = InterpolationEngine::query(&model, 45.0, 0.0).unwrap();
        assert_eq!(wrapped, zero);
    }

    #[test]
    fn repeated_queries_are_bit_identical() {
        let model = small_model();
        let a = InterpolationEngine::query(&model, 33.3, 201.7).unwrap();
        let b = InterpolationEngine::query(&model, 33.3, 201.7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.annual_kwh.to_bits(), b.annual_kwh.to_bits());
    }

    #[test]
    fn rejects_invalid_geometry() {
        let model = small_model();
        for (t, o) in [(-0.1, 0.0), (90.1, 0.0), (10.0, -1.0), (10.0, 360.5), (f64::NAN, 0.0), (0.0, f64::NAN)] {
            assert!(matches!(
                InterpolationEngine::query(&model, t, o),
                Err(SolarError::InvalidPanelGeometry { .. })
            ));
        }
        assert!(InterpolationEngine::query(&model, 90.0, 360.0).is_ok());
    }

    #[test]
    fn bracket_helpers() {
        let axis = [0.0, 5.0, 10.0];
        assert_eq!(bracket_linear(&axis, 7.5), Bracket { lower: 1, upper: 2, fraction: 0.5 });
        assert_eq!(bracket_linear(&axis, 10.0), Bracket { lower: 2, upper: 2, fraction: 0.0 });
        let cyc = [0.0, 120.0, 240.0];
        assert_eq!(bracket_cyclic(&cyc, 300.0), Bracket { lower: 2, upper: 0, fraction: 0.5 });
    }
}
