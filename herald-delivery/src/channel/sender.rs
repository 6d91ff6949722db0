use std::{future::Future, sync::Arc};

use herald_common::{Channel, outgoing, tracing};
use tokio::time::Instant;

use super::{Composer, EmailTransport, SmsTransport};
use crate::{
    circuit_breaker::CircuitBreaker,
    error::DeliveryError,
    policy::{RetryContext, RetryExecutor},
    rate_limiter::TokenBucketLimiter,
    types::NotificationJob,
};

/// The shared limiter and breaker of one downstream service, plus the retry
/// executor wrapped around every send to it
#[derive(Debug, Clone)]
pub struct ResilienceGuard {
    pub limiter: Arc<TokenBucketLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryExecutor,
}

impl ResilienceGuard {
    /// Take one token, then run `send` through the breaker under the retry executor
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt, or [`DeliveryError::CircuitOpen`]
    /// if the breaker refused the call.
    pub async fn run<F, Fut>(&self, context: RetryContext<'_>, send: F) -> Result<(), DeliveryError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        self.limiter.acquire().await;

        let send = &send;
        self.retry
            .execute(&context, || self.breaker.execute(send))
            .await
    }
}

fn report(
    channel: Channel,
    job: &NotificationJob,
    started: Instant,
    result: &Result<(), DeliveryError>,
) {
    let kind = job.kind.label();

    match result {
        Ok(()) => {
            let elapsed = started.elapsed();
            outgoing!(
                level = INFO,
                job_id = %job.id,
                channel = %channel,
                kind,
                elapsed_ms = elapsed.as_millis(),
                "Notification sent"
            );
            if let Some(metrics) = herald_metrics::get() {
                metrics
                    .channel
                    .record_sent(channel.as_str(), kind, elapsed.as_secs_f64());
            }
        }
        Err(err) => {
            tracing::error!(
                job_id = %job.id,
                channel = %channel,
                kind,
                error = %err,
                "Error sending notification"
            );
            if let Some(metrics) = herald_metrics::get() {
                metrics
                    .channel
                    .record_error(channel.as_str(), kind, err.class());
            }
        }
    }
}

/// Sends email notifications through the `smtp` service
#[derive(Clone)]
pub struct EmailSender {
    transport: Arc<dyn EmailTransport>,
    guard: ResilienceGuard,
    composer: Arc<Composer>,
}

impl std::fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSender")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl EmailSender {
    #[must_use]
    pub fn new(transport: Arc<dyn EmailTransport>, guard: ResilienceGuard) -> Self {
        Self {
            transport,
            guard,
            composer: Arc::new(Composer::new()),
        }
    }

    /// Compose and deliver `job` by email
    ///
    /// # Errors
    ///
    /// Composition failures are terminal; send failures are whatever the last
    /// attempt returned.
    pub async fn send(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let started = Instant::now();
        let result = self.deliver(job).await;
        report(Channel::Email, job, started, &result);
        result
    }

    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let message = self.composer.email(job)?;
        let context = RetryContext {
            channel: Channel::Email.as_str(),
            kind: job.kind.label(),
        };

        self.guard
            .run(context, || self.transport.send(&message))
            .await
    }
}

/// Sends SMS notifications through the `sms` service
#[derive(Clone)]
pub struct SmsSender {
    transport: Arc<dyn SmsTransport>,
    guard: ResilienceGuard,
    composer: Arc<Composer>,
}

impl std::fmt::Debug for SmsSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsSender")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl SmsSender {
    #[must_use]
    pub fn new(transport: Arc<dyn SmsTransport>, guard: ResilienceGuard) -> Self {
        Self {
            transport,
            guard,
            composer: Arc::new(Composer::new()),
        }
    }

    /// Compose and deliver `job` by SMS
    ///
    /// # Errors
    ///
    /// Composition failures are terminal; send failures are whatever the last
    /// attempt returned.
    pub async fn send(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let started = Instant::now();
        let result = self.deliver(job).await;
        report(Channel::Sms, job, started, &result);
        result
    }

    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let message = self.composer.sms(job)?;
        let context = RetryContext {
            channel: Channel::Sms.as_str(),
            kind: job.kind.label(),
        };

        self.guard
            .run(context, || self.transport.send(&message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use herald_common::{NotificationKind, Recipient};

    use super::*;
    use crate::{
        channel::{EmailMessage, SmsMessage},
        circuit_breaker::{CircuitState, ServiceBreakerConfig},
        error::{TerminalError, TransientError},
        policy::RetryPolicy,
        rate_limiter::ServiceRateLimit,
        types::OrderSummary,
    };

    #[derive(Default)]
    struct FlakySms {
        calls: AtomicU32,
        failures: u32,
        sent: parking_lot::Mutex<Vec<SmsMessage>>,
    }

    #[async_trait]
    impl SmsTransport for FlakySms {
        async fn send(&self, message: &SmsMessage) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(TransientError::ConnectionFailed("gateway reset".to_string()).into());
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RejectingEmail {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmailTransport for RejectingEmail {
        async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TerminalError::InvalidRecipient(message.to.clone()).into())
        }
    }

    fn guard(service: &str) -> ResilienceGuard {
        ResilienceGuard {
            limiter: Arc::new(TokenBucketLimiter::new(
                service,
                &ServiceRateLimit {
                    rate_per_second: 5.0,
                    burst_size: 10,
                },
            )),
            breaker: Arc::new(CircuitBreaker::new(
                service,
                ServiceBreakerConfig {
                    failure_threshold: 5,
                    reset_timeout_ms: 30_000,
                },
            )),
            retry: RetryExecutor::new(RetryPolicy::default()),
        }
    }

    fn job(kind: NotificationKind, channel: Channel, address: &str) -> NotificationJob {
        NotificationJob::for_order(
            kind,
            channel,
            Recipient::new(address),
            OrderSummary {
                order_id: "A-7".to_string(),
                total_amount: 10.0,
                items: Vec::new(),
                tracking_url: None,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_recovers_after_transient_failure() {
        let transport = Arc::new(FlakySms {
            failures: 1,
            ..FlakySms::default()
        });
        let sender = SmsSender::new(transport.clone(), guard("sms"));
        let start = Instant::now();

        sender
            .send(&job(
                NotificationKind::PaymentConfirmation,
                Channel::Sms,
                "+15550100",
            ))
            .await
            .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(
            transport.sent.lock()[0].body,
            "Payment received for order #A-7. Amount: $10.00."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_against_the_breaker() {
        let transport = Arc::new(FlakySms {
            failures: u32::MAX,
            ..FlakySms::default()
        });
        let guard = guard("sms");
        let sender = SmsSender::new(transport.clone(), guard.clone());
        let job = job(NotificationKind::OrderConfirmation, Channel::Sms, "+15550100");

        assert!(matches!(
            sender.send(&job).await,
            Err(DeliveryError::Transient(_))
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker.stats().failure_count, 3);

        // Two more failures trip the breaker mid-retry; the rest is refused
        assert!(matches!(
            sender.send(&job).await,
            Err(DeliveryError::CircuitOpen { .. })
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
        assert_eq!(guard.breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_transport_error_is_not_retried() {
        let transport = Arc::new(RejectingEmail::default());
        let sender = EmailSender::new(transport.clone(), guard("smtp"));

        let result = sender
            .send(&job(
                NotificationKind::OrderConfirmation,
                Channel::Email,
                "nobody@invalid",
            ))
            .await;

        assert!(matches!(
            result,
            Err(DeliveryError::Terminal(TerminalError::InvalidRecipient(_)))
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compose_failure_never_reaches_the_transport() {
        let transport = Arc::new(FlakySms::default());
        let guard = guard("sms");
        let sender = SmsSender::new(transport.clone(), guard.clone());

        let result = sender
            .send(&job(
                NotificationKind::ShippingConfirmation,
                Channel::Sms,
                "+15550100",
            ))
            .await;

        assert!(matches!(result, Err(DeliveryError::Terminal(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!((guard.limiter.stats().tokens - 10.0).abs() < f64::EPSILON);
    }
}
