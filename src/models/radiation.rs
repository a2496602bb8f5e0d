use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::SolarError;

/// Mean earth radius in km, used for every haversine distance in the crate.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

pub const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

/// A validated geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = SolarError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, SolarError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(SolarError::InvalidCoordinate { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn key(&self, precision: u32) -> CoordinateKey {
        CoordinateKey::new(*self, precision)
    }

    /// Great-circle distance in km.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

/// Rounded coordinate used as the exact-cache and coalescing key.
///
/// Stored as scaled integers so equality and hashing are exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinateKey {
    lat_scaled: i64,
    lon_scaled: i64,
    precision: u32,
}

impl CoordinateKey {
    pub fn new(coordinate: Coordinate, precision: u32) -> Self {
        let factor = 10f64.powi(precision as i32);
        Self {
            lat_scaled: (coordinate.latitude * factor).round() as i64,
            lon_scaled: (coordinate.longitude * factor).round() as i64,
            precision,
        }
    }

    /// The rounded point this key stands for.
    pub fn to_coordinate(&self) -> Coordinate {
        let factor = 10f64.powi(self.precision as i32);
        Coordinate {
            latitude: (self.lat_scaled as f64 / factor).clamp(-90.0, 90.0),
            longitude: (self.lon_scaled as f64 / factor).clamp(-180.0, 180.0),
        }
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.to_coordinate();
        let p = self.precision as usize;
        write!(f, "solar:{:.p$}:{:.p$}", c.latitude, c.longitude)
    }
}

/// Axis-aligned coverage box of a provider, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&coordinate.latitude)
            && (self.min_lon..=self.max_lon).contains(&coordinate.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Hourly,
    Monthly,
}

/// Time span a sample integrates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePeriod {
    /// Hour starting at the given instant.
    Hour(DateTime<Utc>),
    /// Whole calendar month, 1..=12.
    Month(u8),
}

impl SamplePeriod {
    /// Calendar month 1..=12.
    pub fn month(&self) -> u8 {
        match self {
            SamplePeriod::Hour(start) => start.month() as u8,
            SamplePeriod::Month(m) => *m,
        }
    }
}

/// Irradiation over one period, in kWh/m².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRadiationSample {
    pub period: SamplePeriod,
    pub ghi_kwh_m2: f64,
    pub dni_kwh_m2: Option<f64>,
    pub dhi_kwh_m2: Option<f64>,
}

impl RawRadiationSample {
    fn is_usable(&self) -> bool {
        self.ghi_kwh_m2.is_finite() && self.ghi_kwh_m2 >= 0.0 && (1..=12).contains(&self.period.month())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider_id: String,
    pub resolution: Resolution,
    pub samples: Vec<RawRadiationSample>,
    pub coverage_confidence: f64,
    pub degraded: bool,
}

impl ProviderResult {
    /// Calendar months (index 0 = January) carrying at least one usable sample.
    pub fn months_present(&self) -> [bool; 12] {
        let mut present = [false; 12];
        for sample in self.samples.iter().filter(|s| s.is_usable()) {
            present[(sample.period.month() - 1) as usize] = true;
        }
        present
    }

    pub fn month_count(&self) -> usize {
        self.months_present().iter().filter(|p| **p).count()
    }
}
