//! Per-service rate limiting using the token bucket algorithm
//!
//! Each downstream service (`smtp`, `sms`) has exactly one limiter, shared by
//! every sender that talks to it.
//!
//! # Token Bucket Algorithm
//!
//! - The bucket starts full, holding `burst_size` tokens
//! - Tokens are added at a constant rate (`rate_per_second`), capped at `burst_size`
//! - Each send consumes one token
//! - Callers that find the bucket empty wait in FIFO order
//!
//! ```text
//! Rate limit: 5 msg/sec, burst: 10
//! - 10 sends go out immediately
//! - the 11th waits (1 - tokens) / rate = 200ms
//! ```
//!
//! Waiters are served by a single processing task per limiter, spawned on
//! demand and exiting once no one is waiting.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use herald_common::tracing;
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};

use crate::error::{DeliveryError, SystemError};

/// Shortest sleep of the processing task, so float rounding never turns the
/// wait into a busy loop
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default tokens added per second
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,

    /// Default bucket capacity (and initial token count)
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Per-service overrides
    #[serde(default = "default_service_limits")]
    pub service_limits: ahash::AHashMap<String, ServiceRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate_per_second(),
            burst_size: default_burst_size(),
            service_limits: default_service_limits(),
        }
    }
}

impl RateLimitConfig {
    /// Effective limit for a service
    #[must_use]
    pub fn limit_for(&self, service: &str) -> ServiceRateLimit {
        self.service_limits
            .get(service)
            .cloned()
            .unwrap_or(ServiceRateLimit {
                rate_per_second: self.rate_per_second,
                burst_size: self.burst_size,
            })
    }

    /// Check the default limit and every override
    ///
    /// # Errors
    ///
    /// [`SystemError::Configuration`] naming the first limit that could never
    /// hand out a token.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let default = ServiceRateLimit {
            rate_per_second: self.rate_per_second,
            burst_size: self.burst_size,
        };
        default.validate("default")?;

        for (service, limit) in &self.service_limits {
            limit.validate(service)?;
        }

        Ok(())
    }
}

const fn default_rate_per_second() -> f64 {
    10.0
}

const fn default_burst_size() -> u32 {
    20
}

fn default_service_limits() -> ahash::AHashMap<String, ServiceRateLimit> {
    let mut limits = ahash::AHashMap::default();
    limits.insert(
        crate::registry::SMS.to_string(),
        ServiceRateLimit {
            rate_per_second: 5.0,
            burst_size: 10,
        },
    );
    limits
}

/// Per-service rate limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRateLimit {
    pub rate_per_second: f64,
    pub burst_size: u32,
}

impl ServiceRateLimit {
    fn validate(&self, service: &str) -> Result<(), DeliveryError> {
        if !self.rate_per_second.is_finite() || self.rate_per_second <= 0.0 {
            return Err(SystemError::Configuration(format!(
                "rate limit for {service}: rate_per_second must be positive, got {}",
                self.rate_per_second
            ))
            .into());
        }

        if self.burst_size == 0 {
            return Err(SystemError::Configuration(format!(
                "rate limit for {service}: burst_size must be at least 1"
            ))
            .into());
        }

        Ok(())
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: rate_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token is available
    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::try_from_secs_f64(tokens_needed / self.refill_rate)
            .unwrap_or(Duration::MAX)
            .max(MIN_WAIT)
    }
}

#[derive(Debug)]
struct LimiterState {
    bucket: TokenBucket,
    waiters: VecDeque<oneshot::Sender<()>>,
    processing: bool,
}

/// Token bucket limiter for one downstream service
#[derive(Debug)]
pub struct TokenBucketLimiter {
    service: String,
    state: parking_lot::Mutex<LimiterState>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(service: impl Into<String>, limit: &ServiceRateLimit) -> Self {
        let limiter = Self {
            service: service.into(),
            state: parking_lot::Mutex::new(LimiterState {
                bucket: TokenBucket::new(limit.rate_per_second, limit.burst_size),
                waiters: VecDeque::new(),
                processing: false,
            }),
        };
        limiter.publish(&limiter.state.lock());
        limiter
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait until a token is available, then consume it
    ///
    /// Callers are granted tokens strictly in arrival order: nobody takes the
    /// fast path while others are already waiting.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, which hosts the processing task.
    pub async fn acquire(self: &Arc<Self>) {
        let (receiver, spawn) = {
            let mut state = self.state.lock();

            if state.waiters.is_empty() && state.bucket.try_consume() {
                self.publish(&state);
                return;
            }

            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            let spawn = !state.processing;
            state.processing = true;
            self.publish(&state);
            (receiver, spawn)
        };

        if let Some(metrics) = herald_metrics::get() {
            metrics.limiter.record_throttled(&self.service);
        }

        if spawn {
            tokio::spawn(Arc::clone(self).process());
        }

        // The sender only disappears if the processing task was torn down
        // with the runtime; there is nothing left to wait for then.
        let _ = receiver.await;
    }

    /// Hand out tokens to waiters until the queue is empty
    async fn process(self: Arc<Self>) {
        loop {
            let wait = {
                let mut state = self.state.lock();

                loop {
                    if state.waiters.is_empty() {
                        state.processing = false;
                        self.publish(&state);
                        return;
                    }

                    let wait = state.bucket.time_until_available();
                    if !wait.is_zero() {
                        break wait;
                    }

                    if let Some(waiter) = state.waiters.pop_front()
                        && waiter.send(()).is_ok()
                    {
                        state.bucket.tokens -= 1.0;
                    }
                }
            };

            self.publish(&self.state.lock());

            tracing::trace!(
                service = %self.service,
                wait_ms = wait.as_millis(),
                "Waiting for token refill"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Current bucket state (for monitoring/debugging)
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock();
        state.bucket.refill();
        LimiterStats {
            tokens: state.bucket.tokens,
            capacity: state.bucket.capacity,
            refill_rate: state.bucket.refill_rate,
            waiters: state.waiters.len(),
        }
    }

    fn publish(&self, state: &LimiterState) {
        if let Some(metrics) = herald_metrics::get() {
            metrics
                .limiter
                .set_tokens(&self.service, state.bucket.tokens);
            metrics
                .limiter
                .set_waiters(&self.service, state.waiters.len() as u64);
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterStats {
    /// Tokens currently in the bucket
    pub tokens: f64,
    /// Maximum tokens (burst size)
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Callers waiting for a token
    pub waiters: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: u32) -> Arc<TokenBucketLimiter> {
        Arc::new(TokenBucketLimiter::new(
            "sms",
            &ServiceRateLimit {
                rate_per_second: rate,
                burst_size: burst,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let limiter = limiter(5.0, 10);
        let start = Instant::now();

        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.stats().tokens < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_acquire_waits_one_refill_interval() {
        let limiter = limiter(5.0, 10);
        for _ in 0..10 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(200), "waited {waited:?}");
        assert!(waited < Duration::from_millis(210), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_in_arrival_order() {
        let limiter = limiter(10.0, 1);
        limiter.acquire().await;

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().push(i);
            }));
            // Make sure each task has queued before the next one is spawned
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate() {
        let limiter = limiter(10.0, 2);
        let start = Instant::now();

        for _ in 0..12 {
            limiter.acquire().await;
        }

        // 2 from the burst, then 10 more at 10/s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_consume_a_token() {
        let limiter = limiter(1.0, 1);
        limiter.acquire().await;

        let abandoned = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.stats().waiters, 0);
        assert!(limiter.stats().tokens >= 1.0);
    }

    #[test]
    fn test_default_service_limits() {
        let config = RateLimitConfig::default();

        assert_eq!(
            config.limit_for("smtp"),
            ServiceRateLimit {
                rate_per_second: 10.0,
                burst_size: 20
            }
        );
        assert_eq!(
            config.limit_for("sms"),
            ServiceRateLimit {
                rate_per_second: 5.0,
                burst_size: 10
            }
        );
    }

    #[test]
    fn test_time_until_available() {
        let mut bucket = TokenBucket::new(4.0, 1);
        assert_eq!(bucket.time_until_available(), Duration::ZERO);

        bucket.tokens = 0.5;
        bucket.last_refill = Instant::now();
        let wait = bucket.time_until_available();
        assert!(wait >= Duration::from_millis(124) && wait <= Duration::from_millis(125));
    }

    #[test]
    fn test_validate_rejects_limits_that_never_grant() {
        assert!(RateLimitConfig::default().validate().is_ok());

        let zero_burst: RateLimitConfig = ron::from_str("(burst_size: 0)").unwrap();
        let err = zero_burst.validate().unwrap_err();
        assert!(err.is_system());
        assert!(err.to_string().contains("burst_size"));

        let stalled: RateLimitConfig = ron::from_str("(rate_per_second: 0.0)").unwrap();
        assert!(stalled.validate().is_err());

        let mut bad_override = RateLimitConfig::default();
        bad_override.service_limits.insert(
            "smtp".to_string(),
            ServiceRateLimit {
                rate_per_second: -1.0,
                burst_size: 5,
            },
        );
        let err = bad_override.validate().unwrap_err();
        assert!(err.to_string().contains("smtp"));
    }
}
