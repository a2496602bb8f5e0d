use chrono::{Datelike, Duration as ChronoDuration, Timelike};

use crate::models::radiation::{Coordinate, RawRadiationSample, SamplePeriod};
use crate::services::solar_geometry::{
    DAYS_IN_MONTH, DayGeometry, MID_MONTH_DOY, cos_incidence, extraterrestrial_horizontal,
    sun_position, sun_position_from_hour_angle,
};

/// Converts irradiance samples into monthly generation per m² of panel.
///
/// Implementations must be pure: the same inputs always give the same output.
/// Months without samples are returned as 0.0.
pub trait PanelResponseModel: Send + Sync {
    fn convert(
        &self,
        samples: &[RawRadiationSample],
        coordinate: Coordinate,
        tilt_deg: f64,
        orientation_deg: f64,
    ) -> [f64; 12];
}

const INVERTER_EFFICIENCY: f64 = 0.97;
const WIRING_LOSS: f64 = 0.02;
const SOILING_LOSS: f64 = 0.02;
const DEFAULT_ALBEDO: f64 = 0.20;
// Below ~5° elevation the horizontal-to-tilted beam ratio blows up.
const MIN_SIN_ELEVATION: f64 = 0.0872;
const DAY_STEPS: u32 = 144;

/// Isotropic-sky transposition of beam, diffuse and ground-reflected irradiance.
///
/// Hourly samples are transposed hour by hour at the mid-hour sun position.
/// Monthly totals are split into beam and diffuse with the Page correlation
/// against extraterrestrial irradiation and transposed with the beam ratio of
/// the month's representative day.
#[derive(Debug, Clone)]
pub struct IsotropicTranspositionModel {
    panel_efficiency: f64,
    albedo: f64,
}

impl IsotropicTranspositionModel {
    pub fn new(panel_efficiency: f64) -> Self {
        Self {
            panel_efficiency,
            albedo: DEFAULT_ALBEDO,
        }
    }

    pub fn with_albedo(mut self, albedo: f64) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn system_efficiency(&self) -> f64 {
        self.panel_efficiency * INVERTER_EFFICIENCY * (1.0 - WIRING_LOSS) * (1.0 - SOILING_LOSS)
    }

    fn hourly_poa(&self, sample: &RawRadiationSample, coordinate: Coordinate, tilt_deg: f64, orientation_deg: f64) -> f64 {
        let SamplePeriod::Hour(start) = sample.period else {
            return 0.0;
        };
        let ghi = sample.ghi_kwh_m2;
        let mid = start + ChronoDuration::minutes(30);
        let utc_hour = mid.hour() as f64 + mid.minute() as f64 / 60.0;
        let sun = sun_position(coordinate.latitude(), coordinate.longitude(), mid.ordinal(), utc_hour);

        let cos_tilt = tilt_deg.to_radians().cos();
        let reflected = ghi * self.albedo * (1.0 - cos_tilt) / 2.0;

        if !sun.is_up() {
            // Twilight: whatever was measured is diffuse.
            return ghi * (1.0 + cos_tilt) / 2.0 + reflected;
        }

        let dhi = match sample.dhi_kwh_m2 {
            Some(d) if d.is_finite() && d >= 0.0 => d.min(ghi),
            _ => {
                let day = DayGeometry::for_day(mid.ordinal());
                let g0 = extraterrestrial_horizontal(&sun, &day) / 1000.0;
                let kt = if g0 > 0.0 { (ghi / g0).clamp(0.0, 1.0) } else { 0.0 };
                ghi * erbs_diffuse_fraction(kt)
            }
        };

        let cos_theta = cos_incidence(&sun, tilt_deg, orientation_deg);
        let beam = match sample.dni_kwh_m2 {
            Some(dni) if dni.is_finite() && dni >= 0.0 => dni * cos_theta,
            _ => (ghi - dhi).max(0.0) * cos_theta / sun.sin_elevation.max(MIN_SIN_ELEVATION),
        };
        let diffuse = dhi * (1.0 + cos_tilt) / 2.0;

        (beam + diffuse + reflected).max(0.0)
    }

    fn monthly_poa(&self, sample: &RawRadiationSample, coordinate: Coordinate, tilt_deg: f64, orientation_deg: f64) -> f64 {
        let SamplePeriod::Month(month) = sample.period else {
            return 0.0;
        };
        let idx = (month as usize).saturating_sub(1).min(11);
        let day = DayGeometry::for_day(MID_MONTH_DOY[idx]);
        let lat = coordinate.latitude();

        // Integrate one representative day over solar time.
        let step_h = 24.0 / DAY_STEPS as f64;
        let mut h0 = 0.0;
        let mut sum_sin = 0.0;
        let mut sum_cos = 0.0;
        for i in 0..DAY_STEPS {
            let solar_h = (i as f64 + 0.5) * step_h;
            let sun = sun_position_from_hour_angle(lat, &day, 15.0 * (solar_h - 12.0));
            if !sun.is_up() {
                continue;
            }
            h0 += extraterrestrial_horizontal(&sun, &day) * step_h;
            sum_sin += sun.sin_elevation;
            sum_cos += cos_incidence(&sun, tilt_deg, orientation_deg);
        }
        let h0_month = h0 / 1000.0 * DAYS_IN_MONTH[idx] as f64;
        let rb = if sum_sin > 0.0 { sum_cos / sum_sin } else { 0.0 };

        let ghi = sample.ghi_kwh_m2;
        let kd = match sample.dhi_kwh_m2 {
            Some(d) if d.is_finite() && d >= 0.0 && ghi > 0.0 => (d / ghi).min(1.0),
            _ if h0_month > 0.0 => {
                let kt = (ghi / h0_month).clamp(0.0, 1.0);
                (1.0 - 1.13 * kt).clamp(0.1, 1.0)
            }
            _ => 1.0,
        };
        let diffuse = ghi * kd;
        let beam = ghi - diffuse;
        let cos_tilt = tilt_deg.to_radians().cos();

        (beam * rb + diffuse * (1.0 + cos_tilt) / 2.0 + ghi * self.albedo * (1.0 - cos_tilt) / 2.0).max(0.0)
    }
}

/// Erbs et al. (1982) hourly diffuse fraction.
fn erbs_diffuse_fraction(kt: f64) -> f64 {
    if kt <= 0.22 {
        1.0 - 0.09 * kt
    } else if kt <= 0.80 {
        0.9511 - 0.1604 * kt + 4.388 * kt.powi(2) - 16.638 * kt.powi(3) + 12.336 * kt.powi(4)
    } else {
        0.165
    }
}

impl PanelResponseModel for IsotropicTranspositionModel {
    fn convert(
        &self,
        samples: &[RawRadiationSample],
        coordinate: Coordinate,
        tilt_deg: f64,
        orientation_deg: f64,
    ) -> [f64; 12] {
        let mut monthly = [0.0; 12];
        for sample in samples {
            if !sample.ghi_kwh_m2.is_finite() || sample.ghi_kwh_m2 < 0.0 {
                continue;
            }
            let month = sample.period.month();
            if !(1..=12).contains(&month) {
                continue;
            }
            let poa = match sample.period {
                SamplePeriod::Hour(_) => self.hourly_poa(sample, coordinate, tilt_deg, orientation_deg),
                SamplePeriod::Month(_) => self.monthly_poa(sample, coordinate, tilt_deg, orientation_deg),
            };
            monthly[(month - 1) as usize] += poa;
        }
        let efficiency = self.system_efficiency();
        for value in monthly.iter_mut() {
            *value *= efficiency;
        }
        monthly
    }
}
