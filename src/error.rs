use std::time::Duration;

use thiserror::Error;

/// Errors that may reach a caller of the resolution facade.
///
/// Only input validation and `ModelNotFound` are surfaced by the public
/// operations; the remaining variants are produced internally and recovered
/// by falling through to the next cache layer or provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolarError {
    #[error("coordinate out of range: latitude={latitude}, longitude={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("panel geometry out of range: tilt={tilt}, orientation={orientation}")]
    InvalidPanelGeometry { tilt: f64, orientation: f64 },

    #[error("panel area must be in (0, 10000] m², got {0}")]
    InvalidArea(f64),

    #[error("insufficient radiation data from {provider}: {months} month(s) present, {required} required")]
    InsufficientData {
        provider: String,
        months: usize,
        required: usize,
    },

    #[error("all {attempts} provider(s) failed")]
    AllProvidersExhausted { attempts: usize },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("no cached model for {0}")]
    ModelNotFound(String),

    #[error("invalid interpolation model: {0}")]
    InvalidModel(String),
}

/// Failures raised by a single upstream radiation provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to parse upstream payload: {0}")]
    Parse(String),

    #[error("coordinate outside coverage of {0}")]
    OutOfCoverage(String),

    #[error("{provider} returned {months} month(s) of data, {required} required")]
    InsufficientData {
        provider: String,
        months: usize,
        required: usize,
    },
}

/// Outcome of a call rejected or failed behind a resilience guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("circuit breaker for {provider} is OPEN, retry after {retry_after:?}")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },

    #[error("rate limit exceeded for {provider}")]
    RateLimitExceeded { provider: String },

    #[error("concurrency limit reached for {provider}")]
    ConcurrencyExceeded { provider: String },

    #[error("call to {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("{provider} failed: {source}")]
    Upstream {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

impl GuardError {
    /// True when the guard rejected the call without reaching the upstream.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GuardError::CircuitOpen { .. }
                | GuardError::RateLimitExceeded { .. }
                | GuardError::ConcurrencyExceeded { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for SolarError {
    fn from(err: CacheError) -> Self {
        SolarError::CacheUnavailable(err.to_string())
    }
}

/// A coalesced flight that never produced a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlightError {
    #[error("in-flight resolution aborted: {0}")]
    Aborted(String),
}
