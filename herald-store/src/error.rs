//! Error types for the herald-store crate.

use std::io;

use thiserror::Error;

use crate::{NotificationId, ScheduleStatus};

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// No record with this id.
    #[error("Scheduled notification not found: {0}")]
    NotFound(NotificationId),

    /// A conditional update found the record in a different state.
    #[error("Scheduled notification {id} is {actual}, expected {expected}")]
    Conflict {
        id: NotificationId,
        expected: ScheduleStatus,
        actual: ScheduleStatus,
    },

    /// The requested lifecycle change is not allowed from the current state.
    #[error("Scheduled notification {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: NotificationId,
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    /// The store is at its configured capacity.
    #[error("Store capacity exceeded: {len}/{capacity} records")]
    CapacityExceeded { len: usize, capacity: usize },

    /// A preferences update was rejected.
    #[error("Invalid preferences: {0}")]
    InvalidPreferences(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the error reflects the record's state rather than a broken store
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Conflict { .. } | Self::InvalidTransition { .. }
        )
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: StoreError = io_err.into();

        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.to_string().contains("access denied"));
        assert!(!err.is_state_error());
    }

    #[test]
    fn test_conflict_message() {
        let id = NotificationId::generate();
        let err = StoreError::Conflict {
            id: id.clone(),
            expected: ScheduleStatus::Pending,
            actual: ScheduleStatus::Cancelled,
        };

        assert_eq!(
            err.to_string(),
            format!("Scheduled notification {id} is cancelled, expected pending")
        );
        assert!(err.is_state_error());
    }
}
