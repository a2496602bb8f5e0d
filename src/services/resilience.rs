use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout};
use utoipa::ToSchema;

use crate::error::{GuardError, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
    pub concurrency_wait: Duration,
    pub call_timeout: Duration,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(120),
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 3,
            requests_per_minute: 60,
            max_concurrent: 5,
            concurrency_wait: Duration::from_millis(250),
            call_timeout: Duration::from_secs(20),
        }
    }
}

/// Read-only view of a guard, served by the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResilienceSnapshot {
    pub provider_id: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition_at: DateTime<Utc>,
    pub available_rate_tokens: f64,
    pub available_concurrency_slots: usize,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
}

struct GuardState {
    circuit: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    last_transition_at: DateTime<Utc>,
    half_open_in_flight: u32,
    tokens: f64,
    last_refill: Instant,
}

impl GuardState {
    fn refill(&mut self, settings: &GuardSettings, now: Instant) {
        let capacity = settings.requests_per_minute as f64;
        let per_sec = capacity / 60.0;
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(capacity);
        self.last_refill = now;
    }
}

/// Circuit breaker, token-bucket rate limiter and concurrency cap for one upstream.
///
/// Gates are checked in that order on every call. All mutable state sits
/// behind one mutex that is never held across an await point.
pub struct ResilienceGuard {
    provider_id: String,
    settings: GuardSettings,
    state: Mutex<GuardState>,
    slots: Semaphore,
}

/// Admission for one call; releases a half-open trial slot if dropped unsettled.
struct CallTicket<'a> {
    guard: &'a ResilienceGuard,
    trial: bool,
    settled: bool,
}

impl Drop for CallTicket<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut state = self.guard.lock_state();
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl ResilienceGuard {
    pub fn new(provider_id: impl Into<String>, settings: GuardSettings) -> Self {
        let now = Instant::now();
        let state = GuardState {
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            streak_started_at: None,
            opened_at: None,
            last_transition_at: Utc::now(),
            half_open_in_flight: 0,
            tokens: settings.requests_per_minute as f64,
            last_refill: now,
        };
        Self {
            provider_id: provider_id.into(),
            slots: Semaphore::new(settings.max_concurrent.max(1)),
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    fn lock_state(&self) -> MutexGuard<'_, GuardState> {
        // A panic while holding the lock leaves counters usable; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock_state().circuit
    }

    fn transition(&self, state: &mut GuardState, to: CircuitState, now: Instant) {
        if state.circuit == to {
            return;
        }
        let from = state.circuit;
        state.circuit = to;
        state.last_transition_at = Utc::now();
        match to {
            CircuitState::Open => {
                state.opened_at = Some(now);
                state.consecutive_successes = 0;
                tracing::warn!(
                    provider = %self.provider_id,
                    ?from,
                    failures = state.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
                tracing::info!(provider = %self.provider_id, ?from, "circuit breaker half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.consecutive_failures = 0;
                state.streak_started_at = None;
                tracing::info!(provider = %self.provider_id, ?from, "circuit breaker closed");
            }
        }
    }

    fn admit(&self) -> Result<CallTicket<'_>, GuardError> {
        let now = Instant::now();
        let mut state = self.lock_state();

        if state.circuit == CircuitState::Open {
            let opened_at = state.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed < self.settings.recovery_timeout {
                return Err(GuardError::CircuitOpen {
                    provider: self.provider_id.clone(),
                    retry_after: self.settings.recovery_timeout - elapsed,
                });
            }
            self.transition(&mut state, CircuitState::HalfOpen, now);
        }

        let trial = state.circuit == CircuitState::HalfOpen;
        if trial && state.half_open_in_flight >= self.settings.half_open_max_calls {
            return Err(GuardError::CircuitOpen {
                provider: self.provider_id.clone(),
                retry_after: Duration::ZERO,
            });
        }

        state.refill(&self.settings, now);
        if state.tokens < 1.0 {
            return Err(GuardError::RateLimitExceeded {
                provider: self.provider_id.clone(),
            });
        }
        state.tokens -= 1.0;

        if trial {
            state.half_open_in_flight += 1;
        }
        Ok(CallTicket {
            guard: self,
            trial,
            settled: false,
        })
    }

    fn settle(&self, mut ticket: CallTicket<'_>, success: bool) {
        let now = Instant::now();
        let mut state = self.lock_state();
        if ticket.trial {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
        ticket.settled = true;

        if success {
            state.consecutive_failures = 0;
            state.streak_started_at = None;
            state.consecutive_successes += 1;
            if state.circuit == CircuitState::HalfOpen
                && state.consecutive_successes >= self.settings.success_threshold
            {
                self.transition(&mut state, CircuitState::Closed, now);
            }
            return;
        }

        state.consecutive_successes = 0;
        match state.circuit {
            CircuitState::HalfOpen => {
                state.consecutive_failures += 1;
                self.transition(&mut state, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                let streak_expired = state
                    .streak_started_at
                    .is_none_or(|started| now.saturating_duration_since(started) > self.settings.failure_window);
                if streak_expired {
                    state.streak_started_at = Some(now);
                    state.consecutive_failures = 1;
                } else {
                    state.consecutive_failures += 1;
                }
                if state.consecutive_failures >= self.settings.failure_threshold {
                    self.transition(&mut state, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Runs `call` behind the three gates and the per-call timeout.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let ticket = self.admit()?;

        let _permit = match timeout(self.settings.concurrency_wait, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                return Err(GuardError::ConcurrencyExceeded {
                    provider: self.provider_id.clone(),
                });
            }
        };

        match timeout(self.settings.call_timeout, call()).await {
            Ok(Ok(value)) => {
                self.settle(ticket, true);
                Ok(value)
            }
            Ok(Err(source)) => {
                self.settle(ticket, false);
                Err(GuardError::Upstream {
                    provider: self.provider_id.clone(),
                    source,
                })
            }
            Err(_) => {
                self.settle(ticket, false);
                Err(GuardError::Timeout {
                    provider: self.provider_id.clone(),
                    after: self.settings.call_timeout,
                })
            }
        }
    }

    /// Forces the breaker CLOSED and clears its counters, e.g. once an operator
    /// has confirmed the upstream is back. Rate tokens and slots are untouched.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut state = self.lock_state();
        self.transition(&mut state, CircuitState::Closed, now);
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.streak_started_at = None;
        state.opened_at = None;
        tracing::info!(provider = %self.provider_id, "circuit breaker reset");
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        let now = Instant::now();
        let mut state = self.lock_state();
        state.refill(&self.settings, now);
        ResilienceSnapshot {
            provider_id: self.provider_id.clone(),
            circuit_state: state.circuit,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_transition_at: state.last_transition_at,
            available_rate_tokens: state.tokens,
            available_concurrency_slots: self.slots.available_permits(),
            requests_per_minute: self.settings.requests_per_minute,
            max_concurrent: self.settings.max_concurrent,
        }
    }
}
