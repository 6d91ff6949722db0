//! Process-wide registry of per-service limiters and breakers
//!
//! Built once at startup and shared by reference with every sender, so all
//! callers targeting a service throttle and trip together.

use std::sync::Arc;

use dashmap::DashMap;
use herald_common::Channel;

use crate::{
    channel::ResilienceGuard,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    policy::{RetryExecutor, RetryPolicy},
    rate_limiter::{LimiterStats, RateLimitConfig, TokenBucketLimiter},
};

/// Service name of the email relay
pub const SMTP: &str = "smtp";
/// Service name of the SMS gateway
pub const SMS: &str = "sms";

/// Downstream service a channel is delivered through
#[must_use]
pub const fn service_for(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => SMTP,
        Channel::Sms => SMS,
    }
}

#[derive(Debug)]
pub struct ResilienceRegistry {
    rate_limit: RateLimitConfig,
    circuit_breaker: CircuitBreakerConfig,
    retry: RetryPolicy,
    limiters: DashMap<String, Arc<TokenBucketLimiter>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(
            RateLimitConfig::default(),
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
        )
    }
}

impl ResilienceRegistry {
    #[must_use]
    pub fn new(
        rate_limit: RateLimitConfig,
        circuit_breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rate_limit,
            circuit_breaker,
            retry,
            limiters: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// The limiter for `service`, created on first use
    pub fn limiter(&self, service: &str) -> Arc<TokenBucketLimiter> {
        if let Some(limiter) = self.limiters.get(service) {
            return Arc::clone(limiter.value());
        }

        Arc::clone(
            self.limiters
                .entry(service.to_string())
                .or_insert_with(|| {
                    Arc::new(TokenBucketLimiter::new(
                        service,
                        &self.rate_limit.limit_for(service),
                    ))
                })
                .value(),
        )
    }

    /// The breaker for `service`, created on first use
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return Arc::clone(breaker.value());
        }

        Arc::clone(
            self.breakers
                .entry(service.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(
                        service,
                        self.circuit_breaker.for_service(service),
                    ))
                })
                .value(),
        )
    }

    /// Everything a sender for `channel` needs
    pub fn guard(&self, channel: Channel) -> ResilienceGuard {
        let service = service_for(channel);
        ResilienceGuard {
            limiter: self.limiter(service),
            breaker: self.breaker(service),
            retry: RetryExecutor::new(self.retry.clone()),
        }
    }

    /// Limiter statistics, if the service's limiter has been created
    pub fn limiter_stats(&self, service: &str) -> Option<LimiterStats> {
        self.limiters.get(service).map(|limiter| limiter.stats())
    }

    /// Breaker state, if the service's breaker has been created
    pub fn breaker_state(&self, service: &str) -> Option<CircuitState> {
        self.breakers.get(service).map(|breaker| breaker.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_shared_per_service() {
        let registry = ResilienceRegistry::default();

        let first = registry.limiter(SMS);
        let second = registry.limiter(SMS);
        assert!(Arc::ptr_eq(&first, &second));

        let email = registry.guard(Channel::Email);
        assert!(Arc::ptr_eq(&email.breaker, &registry.breaker(SMTP)));
        assert!(!Arc::ptr_eq(&email.breaker, &registry.breaker(SMS)));
    }

    #[test]
    fn test_services_use_their_own_limits() {
        let registry = ResilienceRegistry::default();
        registry.guard(Channel::Email);
        registry.guard(Channel::Sms);

        let smtp = registry.limiter_stats(SMTP).unwrap();
        let sms = registry.limiter_stats(SMS).unwrap();
        assert!((smtp.capacity - 20.0).abs() < f64::EPSILON);
        assert!((sms.capacity - 10.0).abs() < f64::EPSILON);
        assert!((sms.refill_rate - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_service_has_no_state() {
        let registry = ResilienceRegistry::default();
        assert!(registry.breaker_state("fax").is_none());
        assert!(registry.limiter_stats("fax").is_none());
    }
}
