use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::radiation::BoundingBox;
use crate::services::resilience::GuardSettings;

pub const CONFIG_PATH_ENV: &str = "SOLAR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

fn default_port() -> u16 { 8080 }
fn default_key_precision() -> u32 { 5 }
fn default_exact_ttl_secs() -> u64 { 3600 }
fn default_exact_capacity() -> usize { 10_000 }
fn default_proximity_radius_km() -> f64 { 5.0 }
fn default_proximity_ttl_days() -> u32 { 30 }
fn default_stale_after_days() -> u32 { 7 }
fn default_database_path() -> String { "solar_cache.db".to_string() }
fn default_eviction_interval_secs() -> u64 { 300 }
fn default_purge_interval_secs() -> u64 { 6 * 3600 }
fn default_tilt_step() -> f64 { 5.0 }
fn default_orientation_step() -> f64 { 15.0 }
fn default_panel_efficiency() -> f64 { 0.22 }
fn default_min_months() -> usize { 10 }
fn default_resolve_deadline_secs() -> u64 { 45 }
fn default_narrative_timeout_secs() -> u64 { 10 }
fn default_true() -> bool { true }
fn default_requests_per_minute() -> u32 { 10 }
fn default_max_concurrent() -> usize { 5 }
fn default_concurrency_wait_ms() -> u64 { 250 }
fn default_timeout_secs() -> u64 { 20 }
fn default_failure_threshold() -> u32 { 5 }
fn default_failure_window_secs() -> u64 { 120 }
fn default_recovery_timeout_secs() -> u64 { 60 }
fn default_half_open_max_calls() -> u32 { 3 }
fn default_success_threshold() -> u32 { 3 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default = "default_resolve_deadline_secs")]
    pub resolve_deadline_secs: u64,
    #[serde(default = "default_narrative_timeout_secs")]
    pub narrative_timeout_secs: u64,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Decimal places kept in exact-cache keys.
    #[serde(default = "default_key_precision")]
    pub key_precision: u32,
    #[serde(default = "default_exact_ttl_secs")]
    pub exact_ttl_secs: u64,
    #[serde(default = "default_exact_capacity")]
    pub exact_capacity: usize,
    #[serde(default = "default_proximity_radius_km")]
    pub proximity_radius_km: f64,
    #[serde(default = "default_proximity_ttl_days")]
    pub proximity_ttl_days: u32,
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    /// SQLite file; ":memory:" keeps the proximity store in process.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// 0 disables the background purge.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GridConfig {
    #[serde(default = "default_tilt_step")]
    pub tilt_step_deg: f64,
    #[serde(default = "default_orientation_step")]
    pub orientation_step_deg: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BuilderConfig {
    #[serde(default = "default_panel_efficiency")]
    pub panel_efficiency: f64,
    #[serde(default = "default_min_months")]
    pub min_months: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenMeteoArchive,
    Pvgis,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    /// None means global coverage.
    #[serde(default)]
    pub coverage: Option<BoundingBox>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_concurrency_wait_ms")]
    pub concurrency_wait_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_precision: default_key_precision(),
            exact_ttl_secs: default_exact_ttl_secs(),
            exact_capacity: default_exact_capacity(),
            proximity_radius_km: default_proximity_radius_km(),
            proximity_ttl_days: default_proximity_ttl_days(),
            stale_after_days: default_stale_after_days(),
            database_path: default_database_path(),
            eviction_interval_secs: default_eviction_interval_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tilt_step_deg: default_tilt_step(),
            orientation_step_deg: default_orientation_step(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            panel_efficiency: default_panel_efficiency(),
            min_months: default_min_months(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            grid: GridConfig::default(),
            builder: BuilderConfig::default(),
            resolve_deadline_secs: default_resolve_deadline_secs(),
            narrative_timeout_secs: default_narrative_timeout_secs(),
            providers: default_providers(),
        }
    }
}

/// Hourly archive first where it has coverage, PVGIS monthly everywhere else.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "open-meteo-archive".to_string(),
            kind: ProviderKind::OpenMeteoArchive,
            enabled: true,
            priority: 1,
            base_url: None,
            coverage: Some(BoundingBox {
                min_lat: -66.0,
                max_lat: 66.0,
                min_lon: -60.0,
                max_lon: 150.0,
            }),
            requests_per_minute: 10,
            max_concurrent: 5,
            concurrency_wait_ms: default_concurrency_wait_ms(),
            timeout_secs: default_timeout_secs(),
            breaker: BreakerConfig::default(),
        },
        ProviderConfig {
            id: "pvgis".to_string(),
            kind: ProviderKind::Pvgis,
            enabled: true,
            priority: 2,
            base_url: None,
            coverage: None,
            requests_per_minute: 20,
            max_concurrent: 10,
            concurrency_wait_ms: default_concurrency_wait_ms(),
            timeout_secs: default_timeout_secs(),
            breaker: BreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 30,
                ..BreakerConfig::default()
            },
        },
    ]
}

impl ProviderConfig {
    pub fn guard_settings(&self) -> GuardSettings {
        GuardSettings {
            failure_threshold: self.breaker.failure_threshold.max(1),
            failure_window: Duration::from_secs(self.breaker.failure_window_secs),
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
            half_open_max_calls: self.breaker.half_open_max_calls.max(1),
            success_threshold: self.breaker.success_threshold.max(1),
            requests_per_minute: self.requests_per_minute,
            max_concurrent: self.max_concurrent.max(1),
            concurrency_wait: Duration::from_millis(self.concurrency_wait_ms),
            call_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Config::default());
        }
        Config::load(path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let grid = &self.grid;
        anyhow::ensure!(
            grid.tilt_step_deg > 0.0 && grid.tilt_step_deg <= 90.0,
            "grid.tilt_step_deg must be in (0, 90]"
        );
        anyhow::ensure!(
            grid.orientation_step_deg > 0.0 && grid.orientation_step_deg <= 180.0,
            "grid.orientation_step_deg must be in (0, 180]"
        );
        anyhow::ensure!(
            (1..=12).contains(&self.builder.min_months),
            "builder.min_months must be between 1 and 12"
        );
        anyhow::ensure!(
            self.builder.panel_efficiency > 0.0 && self.builder.panel_efficiency <= 1.0,
            "builder.panel_efficiency must be in (0, 1]"
        );
        anyhow::ensure!(self.cache.key_precision <= 9, "cache.key_precision must be at most 9");
        anyhow::ensure!(
            self.cache.proximity_radius_km >= 0.0,
            "cache.proximity_radius_km must not be negative"
        );
        anyhow::ensure!(self.cache.exact_ttl_secs > 0, "cache.exact_ttl_secs must be positive");
        let mut ids = std::collections::HashSet::new();
        for provider in &self.providers {
            anyhow::ensure!(ids.insert(provider.id.as_str()), "duplicate provider id {}", provider.id);
            anyhow::ensure!(
                provider.requests_per_minute > 0,
                "provider {}: requests_per_minute must be positive",
                provider.id
            );
            anyhow::ensure!(
                provider.max_concurrent > 0,
                "provider {}: max_concurrent must be positive",
                provider.id
            );
        }
        Ok(())
    }

    pub fn exact_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.exact_ttl_secs)
    }

    pub fn resolve_deadline(&self) -> Duration {
        Duration::from_secs(self.resolve_deadline_secs)
    }
}
