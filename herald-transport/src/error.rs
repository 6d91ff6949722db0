use herald_delivery::{DeliveryError, SystemError, TerminalError, TransientError};
use thiserror::Error;

/// Errors raised by the concrete transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    Configuration(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gateway rejected message with error {code}: {message}")]
    Api { code: i64, message: String },
}

/// Map an HTTP status from a messaging gateway onto the delivery taxonomy
///
/// 429 and 5xx are retried; any other failure status means the request
/// itself is wrong and will not succeed on a retry.
#[must_use]
pub fn classify_status(status: u16, body: &str) -> DeliveryError {
    let detail = format!("HTTP {status}: {body}");

    match status {
        429 => TransientError::RateLimited(detail).into(),
        500..=599 => TransientError::Unavailable(detail).into(),
        401 | 403 => TerminalError::AuthenticationFailed(detail).into(),
        _ => TerminalError::Rejected(detail).into(),
    }
}

fn classify_smtp(err: &lettre::transport::smtp::Error) -> DeliveryError {
    let detail = err.to_string();

    if err.is_permanent() {
        TerminalError::Rejected(detail).into()
    } else if err.is_timeout() {
        TransientError::Timeout(detail).into()
    } else if err.is_transient() {
        TransientError::Unavailable(detail).into()
    } else {
        // connection, TLS and protocol failures
        TransientError::ConnectionFailed(detail).into()
    }
}

fn classify_http(err: &reqwest::Error) -> DeliveryError {
    let detail = err.to_string();

    if err.is_timeout() {
        TransientError::Timeout(detail).into()
    } else if err.is_connect() {
        TransientError::ConnectionFailed(detail).into()
    } else if err.is_builder() {
        SystemError::Configuration(detail).into()
    } else {
        TransientError::Unavailable(detail).into()
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Configuration(detail) => SystemError::Configuration(detail).into(),
            TransportError::InvalidAddress { address, reason } => {
                TerminalError::InvalidRecipient(format!("{address}: {reason}")).into()
            }
            TransportError::Message(detail) => TerminalError::Rejected(detail).into(),
            TransportError::Smtp(err) => classify_smtp(&err),
            TransportError::Http(err) => classify_http(&err),
            TransportError::Status { status, body } => classify_status(status, &body),
            TransportError::Api { code, message } => {
                TerminalError::Rejected(format!("error {code}: {message}")).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_and_server_errors_are_retryable() {
        assert!(classify_status(429, "slow down").is_retryable());
        assert!(classify_status(500, "").is_retryable());
        assert!(classify_status(503, "maintenance").is_retryable());
    }

    #[test]
    fn test_client_errors_are_terminal() {
        assert!(classify_status(400, "bad To").is_terminal());
        assert!(classify_status(404, "").is_terminal());
        assert!(matches!(
            classify_status(401, "bad credentials"),
            DeliveryError::Terminal(TerminalError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_api_error_code_is_terminal() {
        let err: DeliveryError = TransportError::Api {
            code: 21_211,
            message: "Invalid 'To' Phone Number".to_string(),
        }
        .into();

        assert!(err.is_terminal());
        assert!(err.to_string().contains("21211"));
    }

    #[test]
    fn test_bad_address_is_invalid_recipient() {
        let err: DeliveryError = TransportError::InvalidAddress {
            address: "nobody".to_string(),
            reason: "missing domain".to_string(),
        }
        .into();

        assert!(matches!(
            err,
            DeliveryError::Terminal(TerminalError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_configuration_is_a_system_error() {
        let err: DeliveryError = TransportError::Configuration("no host".to_string()).into();
        assert!(matches!(
            err,
            DeliveryError::System(SystemError::Configuration(_))
        ));
        assert!(!err.is_retryable());
    }
}
