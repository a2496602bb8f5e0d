pub mod open_meteo;
pub mod pvgis;
pub mod synthetic;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::models::radiation::{BoundingBox, Coordinate, ProviderResult};
use crate::services::resilience::ResilienceGuard;

pub use open_meteo::OpenMeteoArchiveProvider;
pub use pvgis::PvgisProvider;
pub use synthetic::SyntheticProvider;

/// Source of raw irradiance samples for a coordinate.
#[async_trait]
pub trait SolarProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> u32;

    /// Declared coverage; `None` means global.
    fn coverage(&self) -> Option<BoundingBox>;

    async fn fetch(&self, coordinate: Coordinate) -> Result<ProviderResult, ProviderError>;
}

/// A provider paired with the guard that owns its health state.
#[derive(Clone)]
pub struct GuardedProvider {
    pub provider: Arc<dyn SolarProvider>,
    pub guard: Arc<ResilienceGuard>,
}

impl GuardedProvider {
    pub fn new(provider: Arc<dyn SolarProvider>, guard: ResilienceGuard) -> Self {
        Self {
            provider,
            guard: Arc::new(guard),
        }
    }
}

/// Instantiates every enabled provider from config, one guard each.
pub fn build_providers(configs: &[ProviderConfig], client: reqwest::Client) -> Vec<GuardedProvider> {
    configs
        .iter()
        .filter(|c| c.enabled)
        .map(|c| {
            let provider: Arc<dyn SolarProvider> = match c.kind {
                ProviderKind::OpenMeteoArchive => Arc::new(OpenMeteoArchiveProvider::new(c, client.clone())),
                ProviderKind::Pvgis => Arc::new(PvgisProvider::new(c, client.clone())),
            };
            tracing::info!(
                provider = %c.id,
                priority = c.priority,
                rpm = c.requests_per_minute,
                max_concurrent = c.max_concurrent,
                "provider registered"
            );
            GuardedProvider::new(provider, ResilienceGuard::new(c.id.clone(), c.guard_settings()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_providers;

    #[test]
    fn builds_enabled_providers_only() {
        let mut configs = default_providers();
        configs[1].enabled = false;
        let providers = build_providers(&configs, reqwest::Client::new());
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider.id(), "open-meteo-archive");
        assert_eq!(providers[0].guard.provider_id(), "open-meteo-archive");
        assert!(providers[0].provider.coverage().is_some());
    }
}
