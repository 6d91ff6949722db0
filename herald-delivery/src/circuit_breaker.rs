//! Per-service circuit breaker to prevent retry storms
//!
//! Each downstream service (`smtp`, `sms`) gets its own breaker, so a failing
//! SMS gateway never throttles email delivery.
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, all calls allowed
//! - **Open**: Circuit tripped due to failures, all calls rejected immediately
//! - **Half-Open**: Testing recovery, a single trial call is allowed through
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  Failure threshold reached   ┌──────┐
//! │ Closed  │ ──────────────────────────>  │ Open │
//! └─────────┘                               └──────┘
//!     ^                                        │
//!     │                                        │ Reset timeout elapsed
//!     │                                        │ and a call arrives
//!     │  Success              ┌───────────────┐v
//!     └───────────────────────│  Half-Open    │
//!                             └───────────────┘
//!                                     │
//!                                     │ Failure
//!                                     v
//!                               ┌──────┐
//!                               │ Open │
//!                               └──────┘
//! ```
//!
//! # Example
//!
//! ```text
//! Threshold: 5 consecutive failures
//! Reset timeout: 30 seconds
//!
//! t=0s:   Closed (normal)
//! t=10s:  5th failure → Open (circuit trips)
//! t=10s-40s: All calls rejected immediately (no wasted retries)
//! t=40s:  Next call → Half-Open (trial call allowed)
//! t=41s:  Trial succeeds → Closed (normal operation resumes)
//! ```
//!
//! Terminal failures (an invalid recipient, a rejected message) prove the
//! service is reachable and answering, so they do not count against it.

use std::{future::Future, time::Duration};

use herald_common::tracing;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DeliveryError;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing a trial call (milliseconds)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Per-service overrides
    #[serde(default)]
    pub service_overrides: ahash::AHashMap<String, ServiceBreakerConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            service_overrides: ahash::AHashMap::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Effective configuration for a service
    #[must_use]
    pub fn for_service(&self, service: &str) -> ServiceBreakerConfig {
        self.service_overrides
            .get(service)
            .cloned()
            .unwrap_or(ServiceBreakerConfig {
                failure_threshold: self.failure_threshold,
                reset_timeout_ms: self.reset_timeout_ms,
            })
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_reset_timeout_ms() -> u64 {
    30_000
}

/// Per-service circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl ServiceBreakerConfig {
    const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Circuit tripped - reject all calls immediately
    Open,
    /// Testing recovery - one trial call allowed
    HalfOpen,
}

impl CircuitState {
    /// Value published on the `herald.breaker.state` gauge
    #[must_use]
    pub const fn gauge_value(self) -> u64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerData {
    state: CircuitState,
    /// Consecutive failures since the last success
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Whether the half-open trial call is currently running
    trial_in_flight: bool,
}

/// Circuit breaker for one downstream service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: ServiceBreakerConfig,
    data: parking_lot::Mutex<BreakerData>,
}

/// Released when the guarded operation finishes or is cancelled
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial {
            self.breaker.data.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(service: impl Into<String>, config: ServiceBreakerConfig) -> Self {
        let breaker = Self {
            service: service.into(),
            config,
            data: parking_lot::Mutex::new(BreakerData {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        };
        breaker.publish(CircuitState::Closed);
        breaker
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Run `operation` unless the circuit is open
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::CircuitOpen`] without invoking `operation` when the
    /// circuit is open (or a half-open trial is already running). Otherwise returns
    /// whatever `operation` returns, after updating the circuit state.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let permit = self.permit()?;
        let result = operation().await;

        match &result {
            Err(err) if !err.is_terminal() => self.record_failure(),
            _ => self.record_success(),
        }

        drop(permit);
        result
    }

    fn permit(&self) -> Result<Permit<'_>, DeliveryError> {
        let mut data = self.data.lock();

        let trial = match data.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = data
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.reset_timeout());

                if !elapsed {
                    drop(data);
                    return Err(self.reject());
                }

                tracing::info!(service = %self.service, "Circuit breaker half-open, allowing trial call");
                data.state = CircuitState::HalfOpen;
                data.trial_in_flight = true;
                self.publish(CircuitState::HalfOpen);
                true
            }
            CircuitState::HalfOpen => {
                if data.trial_in_flight {
                    drop(data);
                    return Err(self.reject());
                }
                data.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
        })
    }

    fn reject(&self) -> DeliveryError {
        tracing::debug!(service = %self.service, "Circuit open, rejecting call");
        if let Some(metrics) = herald_metrics::get() {
            metrics.breaker.record_rejected(&self.service);
        }

        DeliveryError::CircuitOpen {
            service: self.service.clone(),
        }
    }

    fn record_success(&self) {
        let mut data = self.data.lock();
        let previous = data.state;

        data.failure_count = 0;
        data.state = CircuitState::Closed;

        if previous != CircuitState::Closed {
            tracing::info!(service = %self.service, "Circuit breaker closed, service recovered");
            self.publish(CircuitState::Closed);
        }
    }

    fn record_failure(&self) {
        let mut data = self.data.lock();

        data.failure_count = data.failure_count.saturating_add(1);
        data.last_failure = Some(Instant::now());

        let trip = match data.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => data.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            data.state = CircuitState::Open;
            tracing::warn!(
                service = %self.service,
                failures = data.failure_count,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened"
            );
            self.publish(CircuitState::Open);
        }

        if let Some(metrics) = herald_metrics::get() {
            metrics.breaker.record_failure(&self.service);
        }
    }

    /// Current state, without triggering the open → half-open transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let data = self.data.lock();
        BreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            last_failure: data.last_failure,
        }
    }

    fn publish(&self, state: CircuitState) {
        if let Some(metrics) = herald_metrics::get() {
            metrics
                .breaker
                .set_state(&self.service, state.gauge_value());
        }
    }
}

/// Snapshot of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}
