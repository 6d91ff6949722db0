//! Retry policy and executor for send operations.
//!
//! [`RetryPolicy`] holds the configuration and the backoff calculation;
//! [`RetryExecutor`] runs an operation under that policy, sleeping between
//! attempts and giving up early on failures that cannot succeed.

use std::{future::Future, time::Duration};

use herald_common::tracing;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy configuration for send operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (in milliseconds).
    ///
    /// Each further delay doubles: `initial * 2^(failures - 1)`
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (in milliseconds).
    ///
    /// Default: 30000 ms
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random stretch applied to each delay.
    ///
    /// The delay is multiplied by `1 + U[0, jitter_factor]`, so jitter only
    /// ever lengthens it.
    ///
    /// Default: 0.1 (up to +10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_delay_ms: defaults::initial_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt budget, treating a configured zero as a single attempt.
    #[must_use]
    pub const fn attempt_budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Returns `true` if another attempt may follow `attempt_count` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.attempt_budget()
    }

    /// Get the number of remaining attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.attempt_budget().saturating_sub(attempt_count)
    }

    /// Check whether attempt number `attempt` (1-indexed) is the last one allowed.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.attempt_budget()
    }

    /// Delay to wait after `failures` failed attempts (1-indexed).
    ///
    /// # Formula
    /// `delay = min(initial * 2^(failures - 1) * (1 + U[0, jitter]), max_delay)`
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let base = 1u64
            .checked_shl(exponent)
            .map_or(u64::MAX, |multiplier| {
                self.initial_delay_ms.saturating_mul(multiplier)
            });

        let jitter = if self.jitter_factor > 0.0 {
            rand::rng().random_range(0.0..=self.jitter_factor)
        } else {
            0.0
        };

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let delay = ((base as f64) * (1.0 + jitter)).min(self.max_delay_ms as f64) as u64;

        Duration::from_millis(delay)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn initial_delay_ms() -> u64 {
        1000
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }

    pub const fn jitter_factor() -> f64 {
        0.1
    }
}

/// Labels attached to retry metrics and log events.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub channel: &'a str,
    pub kind: &'a str,
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt made.
    pub async fn execute<T, F, Fut>(
        &self,
        context: &RetryContext<'_>,
        mut operation: F,
    ) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if let Some(metrics) = herald_metrics::get() {
                metrics
                    .retry
                    .record_attempt(context.channel, context.kind, attempt);
            }

            if !err.is_retryable() || self.policy.is_final_attempt(attempt) {
                tracing::debug!(
                    channel = context.channel,
                    kind = context.kind,
                    attempt,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Giving up"
                );
                return Err(err);
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                channel = context.channel,
                kind = context.kind,
                attempt,
                remaining = self.policy.remaining_attempts(attempt),
                delay_ms = delay.as_millis(),
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;
    use crate::error::{TerminalError, TransientError};

    const CONTEXT: RetryContext<'static> = RetryContext {
        channel: "email",
        kind: "order_confirmation",
    };

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!((policy.jitter_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_attempt_accounting() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert_eq!(policy.remaining_attempts(1), 2);
        assert_eq!(policy.remaining_attempts(5), 0);

        assert!(!policy.is_final_attempt(2));
        assert!(policy.is_final_attempt(3));

        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.is_final_attempt(1));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_after(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_after(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_only_lengthens() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay = policy.delay_after(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exactly_three_times_with_backoff() {
        let executor = RetryExecutor::default();
        let attempts = Mutex::new(Vec::new());
        let start = Instant::now();

        let result: Result<(), _> = executor
            .execute(&CONTEXT, || {
                attempts.lock().unwrap().push(start.elapsed());
                async { Err(TransientError::Timeout("no response".to_string()).into()) }
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::Transient(_))));

        let attempts = attempts.into_inner().unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0], Duration::ZERO);

        let first = attempts[1] - attempts[0];
        assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(1100));

        let second = attempts[2] - attempts[1];
        assert!(second >= Duration::from_millis(2000) && second <= Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_short_circuits() {
        let executor = RetryExecutor::default();
        let calls = Mutex::new(0);

        let result: Result<(), _> = executor
            .execute(&CONTEXT, || {
                *calls.lock().unwrap() += 1;
                async { Err(TerminalError::MissingRecipient.into()) }
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::Terminal(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_not_retried() {
        let executor = RetryExecutor::default();
        let calls = Mutex::new(0);

        let result: Result<(), _> = executor
            .execute(&CONTEXT, || {
                *calls.lock().unwrap() += 1;
                async {
                    Err(DeliveryError::CircuitOpen {
                        service: "smtp".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let executor = RetryExecutor::default();
        let calls = Mutex::new(0);

        let result = executor
            .execute(&CONTEXT, || {
                let attempt = {
                    let mut calls = calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                async move {
                    if attempt < 2 {
                        Err(TransientError::Unavailable("503".to_string()).into())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
