use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use solar_resolver::config::{CONFIG_PATH_ENV, Config, DEFAULT_CONFIG_PATH};
use solar_resolver::services::solar_data_service::SolarDataService;
use solar_resolver::shared_state::AppState;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,solar_resolver=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn spawn_maintenance(service: Arc<SolarDataService>, config: &Config) {
    let eviction_every = Duration::from_secs(config.cache.eviction_interval_secs.max(1));
    let evicting = service.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(eviction_every).await;
            let removed = evicting.evict_exact().await;
            if removed > 0 {
                tracing::debug!(removed, "evicted expired exact-cache entries");
            }
        }
    });

    if config.cache.purge_interval_secs == 0 {
        return;
    }
    let purge_every = Duration::from_secs(config.cache.purge_interval_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(purge_every).await;
            if let Err(err) = service.purge_expired().await {
                tracing::error!(error = %err, "proximity purge failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    // 1. Load configuration
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    tracing::info!(
        providers = config.providers.iter().filter(|p| p.enabled).count(),
        database = %config.cache.database_path,
        "configuration loaded"
    );

    // 2. Build the resolution service and its background maintenance
    let service = SolarDataService::from_config(&config)?;
    let state = AppState::new(service);
    spawn_maintenance(state.service.clone(), &config);

    // 3. Start Axum HTTP server
    let app = solar_resolver::app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("API Server listening on http://{}", addr);
    tracing::info!("Scalar UI: http://{}/scalar", addr);

    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await
        .context("HTTP server failed")?;
    Ok(())
}
