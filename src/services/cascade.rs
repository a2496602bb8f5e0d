use std::sync::Arc;
use std::time::Instant;

use crate::error::{GuardError, ProviderError};
use crate::models::radiation::{Coordinate, ProviderResult};
use crate::services::metrics::{CallOutcome, MetricsCollector};
use crate::services::providers::{GuardedProvider, SyntheticProvider};

/// Orders candidate providers for a coordinate.
///
/// Providers whose coverage box contains the point come first, then global
/// providers; each group by ascending priority. Providers that declare a box
/// not containing the point are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderSelectionPolicy;

impl ProviderSelectionPolicy {
    pub fn order<'a>(&self, providers: &'a [GuardedProvider], coordinate: Coordinate) -> Vec<&'a GuardedProvider> {
        let mut regional: Vec<&GuardedProvider> = Vec::new();
        let mut global: Vec<&GuardedProvider> = Vec::new();
        for candidate in providers {
            match candidate.provider.coverage() {
                Some(bbox) if bbox.contains(&coordinate) => regional.push(candidate),
                Some(_) => {}
                None => global.push(candidate),
            }
        }
        regional.sort_by_key(|c| c.provider.priority());
        global.sort_by_key(|c| c.provider.priority());
        regional.extend(global);
        regional
    }
}

#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub error: String,
    pub rejected: bool,
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub result: ProviderResult,
    pub used_provider_id: String,
    pub attempts: Vec<ProviderAttempt>,
    pub fell_back: bool,
}

/// Tries providers one at a time through their guards; never fails.
pub struct DataSourceCascade {
    providers: Vec<GuardedProvider>,
    policy: ProviderSelectionPolicy,
    fallback: SyntheticProvider,
    min_months: usize,
    metrics: Arc<MetricsCollector>,
}

impl DataSourceCascade {
    pub fn new(providers: Vec<GuardedProvider>, min_months: usize) -> Self {
        Self {
            providers,
            policy: ProviderSelectionPolicy,
            fallback: SyntheticProvider::new(),
            min_months,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Records provider calls into a shared collector instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn providers(&self) -> &[GuardedProvider] {
        &self.providers
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Synthetic series without touching any upstream.
    pub fn fallback(&self, coordinate: Coordinate) -> CascadeOutcome {
        let result = self.fallback.generate(coordinate);
        CascadeOutcome {
            used_provider_id: result.provider_id.clone(),
            result,
            attempts: Vec::new(),
            fell_back: true,
        }
    }

    pub async fn resolve(&self, coordinate: Coordinate) -> CascadeOutcome {
        let mut attempts = Vec::new();

        for candidate in self.policy.order(&self.providers, coordinate) {
            let provider = candidate.provider.clone();
            let provider_id = provider.id().to_string();
            let min_months = self.min_months;
            let started = Instant::now();

            let outcome = candidate
                .guard
                .execute(move || async move {
                    let result = provider.fetch(coordinate).await?;
                    let months = result.month_count();
                    if months < min_months {
                        return Err(ProviderError::InsufficientData {
                            provider: result.provider_id,
                            months,
                            required: min_months,
                        });
                    }
                    Ok(result)
                })
                .await;

            let latency = started.elapsed();
            let call = match &outcome {
                Ok(_) => CallOutcome::Success,
                Err(err) if err.is_rejection() => CallOutcome::Rejected {
                    rate_limited: matches!(err, GuardError::RateLimitExceeded { .. }),
                },
                Err(_) => CallOutcome::Failure,
            };
            self.metrics.record_provider_call(&provider_id, call, latency);

            match outcome {
                Ok(result) => {
                    tracing::info!(
                        provider = %provider_id,
                        lat = coordinate.latitude(),
                        lon = coordinate.longitude(),
                        samples = result.samples.len(),
                        latency_ms = latency.as_millis() as u64,
                        "provider succeeded"
                    );
                    return CascadeOutcome {
                        used_provider_id: provider_id,
                        result,
                        attempts,
                        fell_back: false,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        provider = %provider_id,
                        lat = coordinate.latitude(),
                        lon = coordinate.longitude(),
                        error = %err,
                        "provider failed, trying next"
                    );
                    attempts.push(ProviderAttempt {
                        provider_id,
                        rejected: GuardError::is_rejection(&err),
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::error!(
            attempts = attempts.len(),
            lat = coordinate.latitude(),
            lon = coordinate.longitude(),
            "all providers exhausted, using synthetic climatology"
        );
        let mut outcome = self.fallback(coordinate);
        outcome.attempts = attempts;
        outcome
    }
}
