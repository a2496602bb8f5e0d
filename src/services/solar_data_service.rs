use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::SolarError;
use crate::models::estimate::{CacheLayer, EstimateQuery, EstimateResult};
use crate::models::interpolation::{InterpolationModel, InterpolationResult, MonthValue};
use crate::models::radiation::{Coordinate, CoordinateKey};
use crate::services::cascade::DataSourceCascade;
use crate::services::coalescer::RequestCoalescer;
use crate::services::collaborators::{ModelSummary, NarrativeGenerator, RegulatoryPlugin};
use crate::services::exact_cache::{ExactCache, MemoryExactCache};
use crate::services::interpolation_engine::{InterpolationEngine, validate_geometry};
use crate::services::metrics::{CacheTier, MetricsCollector, MetricsSnapshot};
use crate::services::model_builder::InterpolationModelBuilder;
use crate::services::panel_response::IsotropicTranspositionModel;
use crate::services::providers::build_providers;
use crate::services::proximity_cache::{ProximityCache, ProximityStats, SqliteProximityCache};
use crate::services::resilience::{CircuitState, ResilienceSnapshot};

pub const MAX_AREA_M2: f64 = 10_000.0;

/// A model together with the layer that produced it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub model: Arc<InterpolationModel>,
    pub layer: CacheLayer,
    pub distance_km: Option<f64>,
}

impl Resolved {
    fn new(model: Arc<InterpolationModel>, layer: CacheLayer) -> Self {
        Self {
            model,
            layer,
            distance_km: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub key_precision: u32,
    pub proximity_radius_km: f64,
    pub exact_ttl: Duration,
    pub resolve_deadline: Duration,
    pub narrative_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            key_precision: config.cache.key_precision,
            proximity_radius_km: config.cache.proximity_radius_km,
            exact_ttl: config.exact_ttl(),
            resolve_deadline: config.resolve_deadline(),
            narrative_timeout: Duration::from_secs(config.narrative_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceStatus {
    pub providers: Vec<ResilienceSnapshot>,
    pub exact_cache_entries: usize,
    pub in_flight_resolutions: usize,
    /// Absent when the proximity store could not be read.
    pub proximity: Option<ProximityStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Some breaker is half-open and probing its upstream.
    Recovering,
    /// The proximity store failed or some breaker is open.
    Degraded,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: HealthState,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// `"healthy"` or `"unhealthy: <reason>"`.
    pub database: String,
    /// Provider id to `"healthy"`, `"recovering"` or `"circuit_open"`.
    pub providers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsReport {
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
    pub circuit_breakers: Vec<ResilienceSnapshot>,
}

/// Cascade, builder and caches as one cheap-to-clone unit, so a flight can own it.
#[derive(Clone)]
struct Pipeline {
    cascade: Arc<DataSourceCascade>,
    builder: Arc<InterpolationModelBuilder>,
    exact: Arc<dyn ExactCache>,
    proximity: Arc<dyn ProximityCache>,
    exact_ttl: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    async fn cached_exact(&self, key: &CoordinateKey) -> Option<Arc<InterpolationModel>> {
        match self.exact.get(key).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "exact cache read failed, treating as miss");
                self.metrics.record_cache_error(CacheTier::Exact);
                None
            }
        }
    }

    async fn store_exact(&self, key: CoordinateKey, model: Arc<InterpolationModel>) {
        if let Err(err) = self.exact.set(key.clone(), model, self.exact_ttl).await {
            tracing::warn!(key = %key, error = %err, "exact cache write failed");
        }
    }

    async fn synthetic(&self, coordinate: Coordinate) -> Result<InterpolationModel, SolarError> {
        let outcome = self.cascade.fallback(coordinate);
        self.builder.build(coordinate, outcome.result).await
    }

    /// Body of a coalesced flight.
    async fn resolve_fresh(self, coordinate: Coordinate, key: CoordinateKey) -> Result<Resolved, SolarError> {
        // A flight that finished just before this one started may have filled the cache.
        if let Some(model) = self.cached_exact(&key).await {
            return Ok(Resolved::new(model, CacheLayer::Exact));
        }

        let outcome = self.cascade.resolve(coordinate).await;
        let attempts = outcome.attempts.len();
        let (model, fell_back) = match self.builder.build(coordinate, outcome.result).await {
            Ok(model) => (model, outcome.fell_back),
            Err(err) => {
                tracing::warn!(
                    provider = %outcome.used_provider_id,
                    key = %key,
                    error = %err,
                    "model build failed, using synthetic climatology"
                );
                let model = self
                    .synthetic(coordinate)
                    .await
                    .map_err(|_| SolarError::AllProvidersExhausted { attempts: attempts + 1 })?;
                (model, true)
            }
        };
        let model = Arc::new(model);

        self.store_exact(key.clone(), model.clone()).await;
        if !fell_back {
            if let Err(err) = self.proximity.save(coordinate, &model).await {
                tracing::warn!(key = %key, error = %err, "proximity cache write failed");
            }
        }

        tracing::info!(
            key = %key,
            provider = %model.source_provider_id(),
            tier = %model.data_tier(),
            confidence = model.confidence_score(),
            fell_back,
            "model resolved"
        );
        let layer = if fell_back { CacheLayer::Fallback } else { CacheLayer::Fresh };
        Ok(Resolved::new(model, layer))
    }
}

/// Entry point: resolves models for coordinates and answers estimates from them.
pub struct SolarDataService {
    pipeline: Pipeline,
    coalescer: RequestCoalescer<CoordinateKey, Result<Resolved, SolarError>>,
    settings: ServiceSettings,
    regulatory: Option<Arc<dyn RegulatoryPlugin>>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
}

impl SolarDataService {
    pub fn new(
        cascade: DataSourceCascade,
        builder: InterpolationModelBuilder,
        exact: Arc<dyn ExactCache>,
        proximity: Arc<dyn ProximityCache>,
        settings: ServiceSettings,
    ) -> Self {
        let metrics = cascade.metrics().clone();
        Self {
            pipeline: Pipeline {
                cascade: Arc::new(cascade),
                builder: Arc::new(builder),
                exact,
                proximity,
                exact_ttl: settings.exact_ttl,
                metrics,
            },
            coalescer: RequestCoalescer::new(),
            settings,
            regulatory: None,
            narrator: None,
        }
    }

    /// Wires real providers, the SQLite proximity store and the default panel model.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("solar-resolver/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let providers = build_providers(&config.providers, client);
        let cascade = DataSourceCascade::new(providers, config.builder.min_months);

        let response = Arc::new(IsotropicTranspositionModel::new(config.builder.panel_efficiency));
        let model_ttl = Duration::from_secs(u64::from(config.cache.proximity_ttl_days) * 86_400);
        let builder = InterpolationModelBuilder::from_config(&config.grid, &config.builder, response, model_ttl);

        let stale_after = Duration::from_secs(u64::from(config.cache.stale_after_days) * 86_400);
        let proximity = SqliteProximityCache::open(
            &config.cache.database_path,
            config.cache.proximity_ttl_days,
            stale_after,
        )
        .with_context(|| format!("failed to open proximity cache at {}", config.cache.database_path))?;
        let exact = MemoryExactCache::new(config.cache.exact_capacity);

        Ok(Self::new(
            cascade,
            builder,
            Arc::new(exact),
            Arc::new(proximity),
            ServiceSettings::from(config),
        ))
    }

    pub fn with_regulatory_plugin(mut self, plugin: Arc<dyn RegulatoryPlugin>) -> Self {
        self.regulatory = Some(plugin);
        self
    }

    pub fn with_narrative_generator(mut self, generator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(generator);
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.pipeline.metrics
    }

    pub fn key_for(&self, coordinate: Coordinate) -> CoordinateKey {
        coordinate.key(self.settings.key_precision)
    }

    pub async fn resolve(&self, coordinate: Coordinate) -> Result<Resolved, SolarError> {
        self.resolve_with_deadline(coordinate, self.settings.resolve_deadline).await
    }

    /// Exact cache, then proximity cache, then one coalesced cascade per key.
    ///
    /// Past `deadline` the caller gets an uncached synthetic model; the flight
    /// keeps running and fills the caches for later callers.
    pub async fn resolve_with_deadline(
        &self,
        coordinate: Coordinate,
        deadline: Duration,
    ) -> Result<Resolved, SolarError> {
        let key = self.key_for(coordinate);
        let pipeline = &self.pipeline;
        let metrics = &pipeline.metrics;

        match pipeline.exact.get(&key).await {
            Ok(Some(model)) => {
                tracing::debug!(key = %key, "exact cache hit");
                metrics.record_cache_hit(CacheTier::Exact);
                return Ok(Resolved::new(model, CacheLayer::Exact));
            }
            Ok(None) => metrics.record_cache_miss(CacheTier::Exact),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "exact cache read failed, treating as miss");
                metrics.record_cache_error(CacheTier::Exact);
            }
        }

        match pipeline
            .proximity
            .find_nearby(coordinate, self.settings.proximity_radius_km)
            .await
        {
            Ok(Some(hit)) => {
                tracing::debug!(key = %key, id = hit.id, distance_km = hit.distance_km, "proximity cache hit");
                metrics.record_cache_hit(CacheTier::Proximity);
                pipeline.store_exact(key, hit.model.clone()).await;
                return Ok(Resolved {
                    model: hit.model,
                    layer: CacheLayer::Proximity,
                    distance_km: Some(hit.distance_km),
                });
            }
            Ok(None) => metrics.record_cache_miss(CacheTier::Proximity),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "proximity cache read failed, treating as miss");
                metrics.record_cache_error(CacheTier::Proximity);
            }
        }

        let flight_pipeline = pipeline.clone();
        let flight_key = key.clone();
        let flight = self
            .coalescer
            .run(key.clone(), move || flight_pipeline.resolve_fresh(coordinate, flight_key));

        match tokio::time::timeout(deadline, flight).await {
            Ok(joined) => match joined.value {
                Ok(Ok(resolved)) => Ok(resolved),
                Ok(Err(err)) => {
                    tracing::warn!(key = %key, error = %err, "resolution flight failed, serving synthetic model");
                    self.deadline_fallback(coordinate).await
                }
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "resolution flight aborted");
                    self.deadline_fallback(coordinate).await
                }
            },
            Err(_) => {
                tracing::warn!(key = %key, deadline_ms = deadline.as_millis() as u64, "resolve deadline passed");
                self.deadline_fallback(coordinate).await
            }
        }
    }

    async fn deadline_fallback(&self, coordinate: Coordinate) -> Result<Resolved, SolarError> {
        let model = self
            .pipeline
            .synthetic(coordinate)
            .await
            .map_err(|_| SolarError::AllProvidersExhausted { attempts: 0 })?;
        Ok(Resolved::new(Arc::new(model), CacheLayer::Fallback))
    }

    pub async fn resolve_estimate(&self, query: EstimateQuery) -> Result<EstimateResult, SolarError> {
        let area = query.area_m2;
        if !(area > 0.0 && area <= MAX_AREA_M2) {
            return Err(SolarError::InvalidArea(area));
        }
        let coordinate = Coordinate::new(query.latitude, query.longitude)?;
        validate_geometry(query.tilt.unwrap_or(0.0), query.orientation.unwrap_or(0.0))?;

        let resolved = self.resolve(coordinate).await?;
        let model = &resolved.model;
        let tilt = query.tilt.unwrap_or(model.optimal_tilt());
        let orientation = query.orientation.unwrap_or(model.optimal_orientation());
        let per_m2 = InterpolationEngine::query(model, tilt, orientation)?;

        let mut monthly = [0.0; 12];
        for (scaled, value) in monthly.iter_mut().zip(&per_m2.monthly_kwh) {
            *scaled = value * area;
        }
        let annual_kwh = per_m2.annual_kwh * area;
        let (peak_month, worst_month) = MonthValue::peak_and_worst(&monthly);
        let savings = self
            .regulatory
            .as_ref()
            .and_then(|plugin| plugin.savings(annual_kwh, query.country_code.as_deref()));
        let narrative = if query.include_narrative {
            self.narrate(model).await
        } else {
            None
        };

        tracing::info!(
            lat = coordinate.latitude(),
            lon = coordinate.longitude(),
            area_m2 = area,
            tilt = per_m2.tilt,
            orientation = per_m2.orientation,
            annual_kwh,
            layer = ?resolved.layer,
            "estimate computed"
        );

        Ok(EstimateResult {
            location: coordinate,
            area_m2: area,
            tilt: per_m2.tilt,
            orientation: per_m2.orientation,
            annual_kwh,
            monthly_kwh: monthly.to_vec(),
            peak_month,
            worst_month,
            efficiency_vs_optimal: per_m2.efficiency_vs_optimal,
            optimal_tilt: per_m2.optimal_tilt,
            optimal_orientation: per_m2.optimal_orientation,
            optimal_annual_kwh: per_m2.optimal_annual_kwh * area,
            data_tier: model.data_tier(),
            confidence_score: model.confidence_score(),
            source_provider_id: model.source_provider_id().to_string(),
            cache_layer: resolved.layer,
            distance_km: resolved.distance_km,
            savings,
            narrative,
        })
    }

    /// Looks up an already cached model (exact, then proximity) without resolving.
    pub async fn cached_model(&self, key: &CoordinateKey) -> Option<Resolved> {
        if let Some(model) = self.pipeline.cached_exact(key).await {
            return Some(Resolved::new(model, CacheLayer::Exact));
        }
        match self
            .pipeline
            .proximity
            .find_nearby(key.to_coordinate(), self.settings.proximity_radius_km)
            .await
        {
            Ok(Some(hit)) => Some(Resolved {
                model: hit.model,
                layer: CacheLayer::Proximity,
                distance_km: Some(hit.distance_km),
            }),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "proximity cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn query_interpolation(
        &self,
        key: &CoordinateKey,
        tilt: f64,
        orientation: f64,
    ) -> Result<InterpolationResult, SolarError> {
        self.query_cached(key, tilt, orientation).await.map(|(_, result)| result)
    }

    /// Like [`Self::query_interpolation`], also returning the model that answered.
    pub async fn query_cached(
        &self,
        key: &CoordinateKey,
        tilt: f64,
        orientation: f64,
    ) -> Result<(Resolved, InterpolationResult), SolarError> {
        validate_geometry(tilt, orientation)?;
        let resolved = self
            .cached_model(key)
            .await
            .ok_or_else(|| SolarError::ModelNotFound(key.to_string()))?;
        let result = InterpolationEngine::query(&resolved.model, tilt, orientation)?;
        Ok((resolved, result))
    }

    /// Runs the configured narrative generator under its timeout.
    pub async fn narrate(&self, model: &InterpolationModel) -> Option<String> {
        let generator = self.narrator.as_ref()?;
        let summary = ModelSummary::from(model);
        match tokio::time::timeout(self.settings.narrative_timeout, generator.narrate(&summary)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "narrative generation failed");
                None
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.settings.narrative_timeout.as_millis() as u64, "narrative generation timed out");
                None
            }
        }
    }

    /// Retention sweep of the durable tier.
    pub async fn purge_expired(&self) -> Result<usize, SolarError> {
        let removed = self.pipeline.proximity.purge_expired().await?;
        tracing::info!(removed, "purged expired proximity entries");
        Ok(removed)
    }

    pub async fn evict_exact(&self) -> usize {
        match self.pipeline.exact.evict_expired().await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(error = %err, "exact cache eviction failed");
                0
            }
        }
    }

    /// Forces the named provider's breaker CLOSED. Returns its new snapshot,
    /// or `None` for an unknown id.
    pub fn reset_provider(&self, provider_id: &str) -> Option<ResilienceSnapshot> {
        let provider = self
            .pipeline
            .cascade
            .providers()
            .iter()
            .find(|p| p.guard.provider_id() == provider_id)?;
        provider.guard.reset();
        Some(provider.guard.snapshot())
    }

    /// Liveness summary: proximity store reachability and breaker states.
    pub async fn health(&self) -> HealthReport {
        let database = match self.pipeline.proximity.stats().await {
            Ok(_) => "healthy".to_string(),
            Err(err) => format!("unhealthy: {err}"),
        };

        let mut status = if database == "healthy" { HealthState::Healthy } else { HealthState::Degraded };
        let mut providers = BTreeMap::new();
        for provider in self.pipeline.cascade.providers() {
            let state = provider.guard.state();
            let label = match state {
                CircuitState::Closed => "healthy",
                CircuitState::HalfOpen => "recovering",
                CircuitState::Open => "circuit_open",
            };
            status = match (status, state) {
                (_, CircuitState::Open) => HealthState::Degraded,
                (HealthState::Healthy, CircuitState::HalfOpen) => HealthState::Recovering,
                (current, _) => current,
            };
            providers.insert(provider.guard.provider_id().to_string(), label.to_string());
        }

        HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            database,
            providers,
        }
    }

    pub fn metrics_report(&self) -> MetricsReport {
        MetricsReport {
            timestamp: Utc::now(),
            metrics: self.pipeline.metrics.snapshot(),
            circuit_breakers: self.pipeline.cascade.providers().iter().map(|p| p.guard.snapshot()).collect(),
        }
    }

    pub async fn status(&self) -> ServiceStatus {
        let providers = self
            .pipeline
            .cascade
            .providers()
            .iter()
            .map(|p| p.guard.snapshot())
            .collect();
        let exact_cache_entries = self.pipeline.exact.len().await.unwrap_or(0);
        let proximity = match self.pipeline.proximity.stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                tracing::warn!(error = %err, "proximity stats unavailable");
                None
            }
        };
        ServiceStatus {
            providers,
            exact_cache_entries,
            in_flight_resolutions: self.coalescer.in_flight(),
            proximity,
        }
    }
}
