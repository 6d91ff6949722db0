//! Channel senders and the transport seam they deliver through
//!
//! A sender composes the message for a job, takes a token from its service's
//! limiter, then sends through the service's circuit breaker under the retry
//! executor:
//!
//! ```text
//! compose → limiter.acquire → retry.execute(breaker.execute(transport.send))
//! ```

mod compose;
mod sender;

use async_trait::async_trait;

pub use compose::Composer;
pub use sender::{EmailSender, ResilienceGuard, SmsSender};

use crate::error::DeliveryError;

/// Body of an email, either rendered HTML or free text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailBody {
    Html(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: EmailBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

/// Sends composed emails (SMTP relay, API, ...)
///
/// Implementations report failures through the [`DeliveryError`] taxonomy:
/// transient failures are retried, terminal ones are not.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

/// Sends composed SMS messages
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send(&self, message: &SmsMessage) -> Result<(), DeliveryError>;
}
