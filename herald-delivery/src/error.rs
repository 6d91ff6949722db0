//! Typed error handling for delivery operations.
//!
//! Failures are classified so that each layer can decide what to do with them:
//! - `QueueFull` surfaces synchronously to the producer, which applies its own backpressure
//! - `CircuitOpen` means the downstream service is presumed unhealthy; not retried immediately
//! - `Transient` failures are retried with backoff by the retry executor
//! - `Terminal` failures (invalid recipient, rejected message) short-circuit retries
//! - `System` errors are internal problems (store unavailable, misconfiguration)

use herald_store::StoreError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The dispatch queue is at capacity.
    #[error("Dispatch queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    /// The circuit breaker for a downstream service is rejecting calls.
    #[error("Circuit open for service {service}")]
    CircuitOpen { service: String },

    /// Retryable transport failure.
    #[error("Transient failure: {0}")]
    Transient(#[from] TransientError),

    /// Non-retryable failure.
    #[error("Terminal failure: {0}")]
    Terminal(#[from] TerminalError),

    /// System-level error.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures that may succeed if the same call is repeated later.
#[derive(Debug, Error)]
pub enum TransientError {
    /// Could not reach the downstream service.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The call did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The downstream service asked us to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The downstream service reported a temporary problem.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Failures that will not succeed no matter how often they are repeated.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The job carries no recipient address.
    #[error("Missing recipient")]
    MissingRecipient,

    /// The recipient address was rejected.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// A field the message template needs is absent.
    #[error("Missing field for {kind}: {field}")]
    MissingField { kind: String, field: &'static str },

    /// The payload cannot be rendered for this kind of notification.
    #[error("Cannot compose {kind} from this payload")]
    UnsupportedPayload { kind: String },

    /// No transport is configured for the channel.
    #[error("Channel not configured: {0}")]
    ChannelUnavailable(String),

    /// The downstream service permanently rejected the message.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Credentials were refused by the downstream service.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A notification preferences update was rejected.
    #[error("Invalid preferences: {0}")]
    InvalidPreferences(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The scheduled notification store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if repeating the call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if this failure must not be retried.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    #[must_use]
    pub const fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Short label used as a metric attribute.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Transient(_) => "transient",
            Self::Terminal(_) => "terminal",
            Self::System(_) => "system",
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(error: StoreError) -> Self {
        Self::System(SystemError::Store(error))
    }
}

#[cfg(test)]
mod tests {
    use herald_store::NotificationId;

    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        let transient: DeliveryError = TransientError::Timeout("smtp".to_string()).into();
        let terminal: DeliveryError = TerminalError::MissingRecipient.into();
        let open = DeliveryError::CircuitOpen {
            service: "sms".to_string(),
        };
        let full = DeliveryError::QueueFull { capacity: 1 };

        assert!(transient.is_retryable());
        assert!(!terminal.is_retryable());
        assert!(!open.is_retryable());
        assert!(!full.is_retryable());

        assert!(terminal.is_terminal());
        assert!(open.is_circuit_open());
        assert!(full.is_queue_full());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: DeliveryError = StoreError::NotFound(NotificationId::generate()).into();
        assert!(err.is_system());
        assert_eq!(err.class(), "system");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_error_display() {
        let err = DeliveryError::QueueFull { capacity: 10_000 };
        assert_eq!(err.to_string(), "Dispatch queue is full (10000 jobs)");

        let err: DeliveryError = TerminalError::MissingField {
            kind: "shipping_confirmation".to_string(),
            field: "tracking_url",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Terminal failure: Missing field for shipping_confirmation: tracking_url"
        );
    }
}
