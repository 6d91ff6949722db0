//! Rate limiter, circuit breaker and retry metrics
//!
//! Every downstream service (`smtp`, `sms`, ...) gets its own series, tagged
//! with a `service` attribute.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

use crate::MetricsError;

type Gauges = Arc<DashMap<String, AtomicU64>>;

fn store(gauges: &Gauges, service: &str, value: u64) {
    if let Some(gauge) = gauges.get(service) {
        gauge.store(value, Ordering::Relaxed);
        return;
    }

    gauges
        .entry(service.to_string())
        .or_default()
        .store(value, Ordering::Relaxed);
}

fn load(gauges: &Gauges, service: &str) -> Option<u64> {
    gauges
        .get(service)
        .map(|gauge| gauge.load(Ordering::Relaxed))
}

/// Token bucket metrics collector
#[derive(Debug)]
pub struct LimiterMetrics {
    /// Acquisitions that had to wait for a token
    throttled_total: Counter<u64>,

    /// Token counts, stored as `f64` bits
    tokens: Gauges,
    waiters: Gauges,
}

impl LimiterMetrics {
    /// Create a new limiter metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let throttled_total = meter
            .u64_counter("herald.limiter.throttled.total")
            .with_description("Total number of token acquisitions that had to wait")
            .build();

        let tokens: Gauges = Arc::default();
        let waiters: Gauges = Arc::default();

        let observed = tokens.clone();
        meter
            .f64_observable_gauge("herald.limiter.tokens")
            .with_description("Tokens currently available per service")
            .with_callback(move |observer| {
                for entry in observed.iter() {
                    observer.observe(
                        f64::from_bits(entry.value().load(Ordering::Relaxed)),
                        &[KeyValue::new("service", entry.key().clone())],
                    );
                }
            })
            .build();

        let observed = waiters.clone();
        meter
            .u64_observable_gauge("herald.limiter.waiters")
            .with_description("Callers waiting for a token per service")
            .with_callback(move |observer| {
                for entry in observed.iter() {
                    observer.observe(
                        entry.value().load(Ordering::Relaxed),
                        &[KeyValue::new("service", entry.key().clone())],
                    );
                }
            })
            .build();

        Ok(Self {
            throttled_total,
            tokens,
            waiters,
        })
    }

    pub fn set_tokens(&self, service: &str, tokens: f64) {
        store(&self.tokens, service, tokens.to_bits());
    }

    #[must_use]
    pub fn tokens(&self, service: &str) -> Option<f64> {
        load(&self.tokens, service).map(f64::from_bits)
    }

    pub fn set_waiters(&self, service: &str, waiters: u64) {
        store(&self.waiters, service, waiters);
    }

    #[must_use]
    pub fn waiters(&self, service: &str) -> Option<u64> {
        load(&self.waiters, service)
    }

    pub fn record_throttled(&self, service: &str) {
        self.throttled_total
            .add(1, &[KeyValue::new("service", service.to_string())]);
    }
}

/// Circuit breaker metrics collector
#[derive(Debug)]
pub struct BreakerMetrics {
    /// Failures observed through the breaker
    failures_total: Counter<u64>,

    /// Calls rejected without reaching the service
    rejected_total: Counter<u64>,

    /// 0 = closed, 1 = open, 2 = half-open
    state: Gauges,
}

impl BreakerMetrics {
    /// Create a new circuit breaker metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let failures_total = meter
            .u64_counter("herald.breaker.failures.total")
            .with_description("Total number of failures recorded by circuit breakers")
            .build();

        let rejected_total = meter
            .u64_counter("herald.breaker.rejected.total")
            .with_description("Total number of calls rejected by an open circuit")
            .build();

        let state: Gauges = Arc::default();
        let observed = state.clone();
        meter
            .u64_observable_gauge("herald.breaker.state")
            .with_description("Circuit state per service (0=closed, 1=open, 2=half-open)")
            .with_callback(move |observer| {
                for entry in observed.iter() {
                    observer.observe(
                        entry.value().load(Ordering::Relaxed),
                        &[KeyValue::new("service", entry.key().clone())],
                    );
                }
            })
            .build();

        Ok(Self {
            failures_total,
            rejected_total,
            state,
        })
    }

    pub fn set_state(&self, service: &str, state: u64) {
        store(&self.state, service, state);
    }

    #[must_use]
    pub fn state(&self, service: &str) -> Option<u64> {
        load(&self.state, service)
    }

    pub fn record_failure(&self, service: &str) {
        self.failures_total
            .add(1, &[KeyValue::new("service", service.to_string())]);
    }

    pub fn record_rejected(&self, service: &str) {
        self.rejected_total
            .add(1, &[KeyValue::new("service", service.to_string())]);
    }
}

/// Retry metrics collector
#[derive(Debug)]
pub struct RetryMetrics {
    /// Failed attempts by channel, notification type and attempt number
    attempts_total: Counter<u64>,

    attempts: AtomicU64,
}

impl RetryMetrics {
    /// Create a new retry metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let attempts_total = meter()
            .u64_counter("herald.retry.attempts.total")
            .with_description("Total number of failed attempts by channel, type and attempt")
            .build();

        Ok(Self {
            attempts_total,
            attempts: AtomicU64::new(0),
        })
    }

    pub fn record_attempt(&self, channel: &str, kind: &str, attempt: u32) {
        let attributes = [
            KeyValue::new("channel", channel.to_string()),
            KeyValue::new("type", kind.to_string()),
            KeyValue::new("attempt", i64::from(attempt)),
        ];
        self.attempts_total.add(1, &attributes);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed attempts recorded since this collector was created
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.resilience")
}
