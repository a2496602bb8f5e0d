use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use utoipa::ToSchema;

const REQUEST_LATENCY_WINDOW: usize = 1000;
const PROVIDER_LATENCY_WINDOW: usize = 100;

/// Cache tier a lookup was counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Exact,
    Proximity,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::Exact => "exact",
            CacheTier::Proximity => "proximity",
        }
    }
}

/// How a provider call behind its guard ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Refused by the breaker, the rate limiter or the concurrency cap; the upstream was not called.
    Rejected { rate_limited: bool },
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Default)]
struct RequestCounters {
    total: u64,
    errors: u64,
    latencies_ms: VecDeque<f64>,
}

#[derive(Debug, Default)]
struct ProviderCounters {
    success: u64,
    errors: u64,
    rejected: u64,
    latencies_ms: VecDeque<f64>,
}

fn push_window(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

fn mean(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

fn p95(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn millis(latency: Duration) -> f64 {
    latency.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RequestStats {
    pub total: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProviderCallStats {
    pub total_calls: u64,
    pub success: u64,
    pub errors: u64,
    /// Calls refused by the guard; not part of `total_calls`.
    pub rejected: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CacheTierStats {
    pub hits: u64,
    /// Includes lookups that failed with an error.
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    /// Keyed by `"<METHOD> <route>"`.
    pub requests: BTreeMap<String, RequestStats>,
    pub providers: BTreeMap<String, ProviderCallStats>,
    pub cache: BTreeMap<String, CacheTierStats>,
    pub rate_limits_triggered: u64,
}

/// Process-wide request, provider-call and cache counters.
///
/// Fixed counters are atomics; keyed tables sit behind short-lived mutexes.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    exact: TierCounters,
    proximity: TierCounters,
    rate_limits: AtomicU64,
    requests: Mutex<HashMap<String, RequestCounters>>,
    providers: Mutex<HashMap<String, ProviderCounters>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(table: &Mutex<T>) -> MutexGuard<'_, T> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            exact: TierCounters::default(),
            proximity: TierCounters::default(),
            rate_limits: AtomicU64::new(0),
            requests: Mutex::new(HashMap::new()),
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn tier(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::Exact => &self.exact,
            CacheTier::Proximity => &self.proximity,
        }
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed lookup is served as a miss and counted as both.
    pub fn record_cache_error(&self, tier: CacheTier) {
        let counters = self.tier(tier);
        counters.misses.fetch_add(1, Ordering::Relaxed);
        counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self, provider_id: &str, outcome: CallOutcome, latency: Duration) {
        let mut providers = lock(&self.providers);
        let counters = providers.entry(provider_id.to_string()).or_default();
        match outcome {
            CallOutcome::Success => counters.success += 1,
            CallOutcome::Failure => counters.errors += 1,
            CallOutcome::Rejected { rate_limited } => {
                counters.rejected += 1;
                if rate_limited {
                    self.rate_limits.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }
        push_window(&mut counters.latencies_ms, millis(latency), PROVIDER_LATENCY_WINDOW);
    }

    pub fn record_request(&self, method: &str, route: &str, status: u16, latency: Duration) {
        let mut requests = lock(&self.requests);
        let counters = requests.entry(format!("{method} {route}")).or_default();
        counters.total += 1;
        if status >= 400 {
            counters.errors += 1;
        }
        push_window(&mut counters.latencies_ms, millis(latency), REQUEST_LATENCY_WINDOW);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = lock(&self.requests)
            .iter()
            .map(|(key, c)| {
                let stats = RequestStats {
                    total: c.total,
                    errors: c.errors,
                    error_rate: percent(c.errors, c.total),
                    avg_latency_ms: mean(&c.latencies_ms),
                };
                (key.clone(), stats)
            })
            .collect();

        let providers = lock(&self.providers)
            .iter()
            .map(|(id, c)| {
                let total_calls = c.success + c.errors;
                let stats = ProviderCallStats {
                    total_calls,
                    success: c.success,
                    errors: c.errors,
                    rejected: c.rejected,
                    success_rate: percent(c.success, total_calls),
                    avg_latency_ms: mean(&c.latencies_ms),
                    p95_latency_ms: p95(&c.latencies_ms),
                };
                (id.clone(), stats)
            })
            .collect();

        let cache = [CacheTier::Exact, CacheTier::Proximity]
            .into_iter()
            .map(|tier| {
                let c = self.tier(tier);
                let hits = c.hits.load(Ordering::Relaxed);
                let misses = c.misses.load(Ordering::Relaxed);
                let stats = CacheTierStats {
                    hits,
                    misses,
                    errors: c.errors.load(Ordering::Relaxed),
                    hit_rate: percent(hits, hits + misses),
                };
                (tier.as_str().to_string(), stats)
            })
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.started.elapsed().as_secs(),
            requests,
            providers,
            cache,
            rate_limits_triggered: self.rate_limits.load(Ordering::Relaxed),
        }
    }
}
