//! Resilient notification delivery
//!
//! This crate provides:
//! - A bounded, priority-ordered dispatch queue with periodic batch draining
//! - Per-service token bucket rate limiting and circuit breaking
//! - Exponential-backoff retries for transient send failures
//! - A redelivery loop feeding due scheduled notifications into the queue
//! - Email and SMS senders composing messages for each notification kind
//! - Per-user preferences deciding which notifications a user receives

pub mod channel;
pub mod circuit_breaker;
mod dispatch;
mod error;
mod pipeline;
pub mod policy;
mod preferences;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod scheduler;
mod service;
mod types;

// Re-export channel types
pub use channel::{
    Composer, EmailBody, EmailMessage, EmailSender, EmailTransport, ResilienceGuard, SmsMessage,
    SmsSender, SmsTransport,
};
// Re-export resilience types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dispatch::Dispatcher;
// Re-export error types
pub use error::{DeliveryError, SystemError, TerminalError, TransientError};
pub use pipeline::{Pipeline, PipelineConfig, Transports};
pub use policy::{RetryContext, RetryExecutor, RetryPolicy};
pub use preferences::Preferences;
pub use queue::{DispatchQueue, NotificationHandler, QueueConfig};
pub use rate_limiter::{LimiterStats, RateLimitConfig, TokenBucketLimiter};
pub use registry::ResilienceRegistry;
pub use scheduler::{RedeliveryLoop, Scheduler, SchedulerConfig};
pub use service::NotificationService;
// Re-export core types
pub use types::{JobId, NotificationJob, OrderItem, OrderSummary, Payload};
