/// ============================================================
///  Solar geometry & clear-sky irradiance
///
///  Building blocks shared by the panel response model and the
///  synthetic climatology provider:
///   1. Spencer (1971) day angle, declination, equation of time,
///      orbital eccentricity correction
///   2. Sun position from UTC time or hour angle – elevation,
///      azimuth (N=0°, clockwise)
///   3. Angle of incidence on a tilted surface
///   4. Clear-sky model – Bird & Hulstrom simplified
///   5. Climatological clearness by latitude band and season
/// ============================================================
use std::f64::consts::PI;

// ─── Physical constants ──────────────────────────────────────
pub const SOLAR_CONSTANT: f64 = 1361.0; // W/m²
const DEG: f64 = PI / 180.0;

/// Recommended average day of each month (Klein 1977), day of year.
pub const MID_MONTH_DOY: [u32; 12] = [17, 47, 75, 105, 135, 162, 198, 228, 258, 288, 318, 344];

pub const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Orbital terms for one day of the year.
#[derive(Debug, Clone, Copy)]
pub struct DayGeometry {
    pub declination_rad: f64,
    pub equation_of_time_min: f64,
    /// Extraterrestrial normal irradiance, W/m².
    pub extraterrestrial_w_m2: f64,
}

impl DayGeometry {
    pub fn for_day(doy: u32) -> Self {
        let b = 2.0 * PI * (doy as f64 - 1.0) / 365.0;

        let declination_rad = 0.006918 - 0.399912 * b.cos() + 0.070257 * b.sin()
            - 0.006758 * (2.0 * b).cos()
            + 0.000907 * (2.0 * b).sin()
            - 0.002697 * (3.0 * b).cos()
            + 0.00148 * (3.0 * b).sin();

        let equation_of_time_min = 229.18
            * (0.000075 + 0.001868 * b.cos()
                - 0.032077 * b.sin()
                - 0.014615 * (2.0 * b).cos()
                - 0.04089 * (2.0 * b).sin());

        let extraterrestrial_w_m2 = SOLAR_CONSTANT
            * (1.00011 + 0.034221 * b.cos() + 0.00128 * b.sin() + 0.000719 * (2.0 * b).cos()
                + 0.000077 * (2.0 * b).sin());

        Self {
            declination_rad,
            equation_of_time_min,
            extraterrestrial_w_m2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SunPosition {
    pub sin_elevation: f64,
    pub elevation_deg: f64,
    /// Degrees from north, clockwise.
    pub azimuth_deg: f64,
}

impl SunPosition {
    pub fn is_up(&self) -> bool {
        self.sin_elevation > 0.0
    }
}

/// Sun position for a latitude and hour angle (negative before solar noon).
pub fn sun_position_from_hour_angle(lat_deg: f64, day: &DayGeometry, omega_deg: f64) -> SunPosition {
    let lat = lat_deg * DEG;
    let decl = day.declination_rad;
    let omega = omega_deg * DEG;

    let sin_alpha = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * omega.cos()).clamp(-1.0, 1.0);
    let alpha = sin_alpha.asin();

    let cos_az = if alpha.cos().abs() > 1e-9 && lat.cos().abs() > 1e-9 {
        (decl.sin() - sin_alpha * lat.sin()) / (alpha.cos() * lat.cos())
    } else {
        0.0
    };
    let az_abs = cos_az.clamp(-1.0, 1.0).acos() / DEG;
    let azimuth_deg = if omega_deg > 0.0 { 360.0 - az_abs } else { az_abs };

    SunPosition {
        sin_elevation: sin_alpha,
        elevation_deg: alpha / DEG,
        azimuth_deg,
    }
}

/// Sun position at a UTC decimal hour, using true solar time at the given longitude.
pub fn sun_position(lat_deg: f64, lon_deg: f64, doy: u32, utc_hour: f64) -> SunPosition {
    let day = DayGeometry::for_day(doy);
    let solar_time_h = (utc_hour + lon_deg / 15.0 + day.equation_of_time_min / 60.0).rem_euclid(24.0);
    sun_position_from_hour_angle(lat_deg, &day, 15.0 * (solar_time_h - 12.0))
}

/// Cosine of the angle of incidence on a surface, clamped at zero (sun behind the panel).
pub fn cos_incidence(sun: &SunPosition, tilt_deg: f64, surface_azimuth_deg: f64) -> f64 {
    if !sun.is_up() {
        return 0.0;
    }
    let tilt = tilt_deg * DEG;
    let alpha = sun.elevation_deg * DEG;
    let az_diff = (sun.azimuth_deg - surface_azimuth_deg) * DEG;
    (alpha.sin() * tilt.cos() + alpha.cos() * tilt.sin() * az_diff.cos()).max(0.0)
}

/// Horizontal extraterrestrial irradiance, W/m².
pub fn extraterrestrial_horizontal(sun: &SunPosition, day: &DayGeometry) -> f64 {
    day.extraterrestrial_w_m2 * sun.sin_elevation.max(0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearSky {
    pub ghi_w_m2: f64,
    pub dni_w_m2: f64,
    pub dhi_w_m2: f64,
}

/// Bird & Hulstrom simplified clear-sky irradiance.
pub fn clear_sky(sun: &SunPosition, day: &DayGeometry) -> ClearSky {
    if sun.elevation_deg <= 0.1 {
        return ClearSky::default();
    }
    let sin_alpha = sun.sin_elevation;
    let e0 = day.extraterrestrial_w_m2;

    // Air mass – Kasten & Young (1989)
    let am = (1.0 / (sin_alpha + 0.50572 * (sun.elevation_deg + 6.07995_f64).powf(-1.6364))).max(1.0);

    // Rayleigh
    let tr = (-0.0903 * am.powf(0.84) * (1.0 + am - am.powf(1.01))).exp();
    // Ozone, 0.3 atm-cm column
    let to = 1.0 - 0.0013 * am;
    // Aerosol, Linke turbidity 3.0
    let tk = 3.0_f64;
    let ta = (-0.09 * tk.powf(0.978) * am.powf(0.9455)).exp();
    // Water vapour, 1.5 cm precipitable
    let tw = 1.0 - 0.0075 * am.powf(0.65);

    let total_t = tr * to * ta * tw;
    let dni = 0.9762 * e0 * total_t;
    let dhi = (0.79 * e0 * sin_alpha * (1.0 - total_t) * (0.5 * (1.0 - tr) + back_scatter_coeff(ta))
        / (1.0 - am + am.powf(1.02)))
    .max(0.0);
    let ghi = (dni * sin_alpha + dhi).max(0.0);

    ClearSky {
        ghi_w_m2: ghi,
        dni_w_m2: dni,
        dhi_w_m2: dhi,
    }
}

#[inline]
fn back_scatter_coeff(ta: f64) -> f64 {
    // Approximated from Bird (1981) Table 2
    0.5 * (0.92 - ta.ln().abs() / 10.0).clamp(0.2, 0.5)
}

/// Long-term fraction of clear-sky irradiance reaching the ground, in [0.15, 1].
///
/// Baseline clearness by climate band with a seasonal swing: northern
/// hemisphere clearest near day 180, southern hemisphere inverted.
pub fn climatological_clearness(lat_deg: f64, doy: u32) -> f64 {
    let doy = doy as f64;
    let season_phase = if lat_deg >= 0.0 {
        (2.0 * PI * (doy - 180.0) / 365.0).cos()
    } else {
        (2.0 * PI * (doy - 365.0) / 365.0).cos()
    };

    let abs_lat = lat_deg.abs();
    let clearness = if abs_lat < 15.0 {
        // Tropical: persistent convective cloud
        0.55 + 0.05 * season_phase
    } else if abs_lat < 35.0 {
        // Subtropical desert belt
        0.70 + 0.10 * season_phase
    } else if abs_lat < 55.0 {
        0.62 + 0.12 * season_phase
    } else if abs_lat < 65.0 {
        0.52 + 0.10 * season_phase
    } else {
        0.45 + 0.10 * season_phase
    };

    clearness.clamp(0.15, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summer_noon_turin() {
        // Turin, summer solstice, ~09:00 UTC is mid-morning local solar time
        let sun = sun_position(45.07, 7.33, 172, 11.3);
        assert!(sun.elevation_deg > 65.0, "elevation {:.1}", sun.elevation_deg);
        assert!((sun.azimuth_deg - 180.0).abs() < 15.0, "azimuth {:.1}", sun.azimuth_deg);
        let cs = clear_sky(&sun, &DayGeometry::for_day(172));
        assert!(cs.ghi_w_m2 > 700.0, "GHI {:.0}", cs.ghi_w_m2);
    }

    #[test]
    fn midnight_is_dark() {
        let sun = sun_position(45.07, 7.33, 172, 23.0);
        assert!(!sun.is_up());
        assert_eq!(clear_sky(&sun, &DayGeometry::for_day(172)).ghi_w_m2, 0.0);
        assert_eq!(cos_incidence(&sun, 30.0, 180.0), 0.0);
    }

    #[test]
    fn winter_solstice_elevation() {
        let day = DayGeometry::for_day(355);
        let sun = sun_position_from_hour_angle(45.07, &day, 0.0);
        assert!(sun.elevation_deg > 15.0 && sun.elevation_deg < 35.0);
    }

    #[test]
    fn morning_sun_in_the_east() {
        let day = DayGeometry::for_day(80);
        let sun = sun_position_from_hour_angle(40.0, &day, -60.0);
        assert!(sun.azimuth_deg > 90.0 && sun.azimuth_deg < 180.0);
        let east = cos_incidence(&sun, 45.0, 90.0);
        let west = cos_incidence(&sun, 45.0, 270.0);
        assert!(east > west);
    }

    #[test]
    fn clearness_follows_seasons() {
        assert!(climatological_clearness(50.0, 180) > climatological_clearness(50.0, 355));
        assert!(climatological_clearness(-35.0, 355) > climatological_clearness(-35.0, 180));
        for lat in [-89.0, -40.0, 0.0, 20.0, 60.0, 89.0] {
            for doy in [1, 100, 200, 365] {
                let c = climatological_clearness(lat, doy);
                assert!((0.15..=1.0).contains(&c));
            }
        }
    }
}
