//! Concrete transports for the delivery pipeline
//!
//! - [`SmtpTransport`] relays email through an SMTP server
//! - [`TwilioTransport`] sends SMS through the Twilio REST API
//!
//! Both map their failures onto [`herald_delivery::DeliveryError`] so the
//! retry executor and circuit breaker can tell a flaky gateway from a
//! message that will never be accepted.

pub mod config;
pub mod error;
pub mod smtp;
pub mod twilio;

pub use config::{SmtpConfig, SmtpSecurity, TwilioConfig};
pub use error::TransportError;
pub use smtp::SmtpTransport;
pub use twilio::TwilioTransport;
