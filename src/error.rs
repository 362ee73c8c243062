//! Error taxonomy
//!
//! Transport faults are converted at the store boundary into one of:
//! - [`BindFailure`]: a subscription could not be opened or a pushed value did
//!   not decode. Logged, never returned; the processor keeps its last value.
//! - [`CommandError`]: a get/set/action failed. Returned to the caller, never
//!   retried by the store.
//!
//! Being disconnected is not an error; widget models derive a dedicated
//! state for it.

use crate::key::KeyId;
use std::time::Duration;
use thiserror::Error;

/// Error reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description} (code {code})")]
pub struct TransportError {
    /// Remote error code
    pub code: i32,
    /// Human readable description
    pub description: String,
}

impl TransportError {
    pub const CODE_NOT_FOUND: i32 = -1001;
    pub const CODE_DISCONNECTED: i32 = -1002;
    pub const CODE_UNSUPPORTED: i32 = -1003;
    pub const CODE_REJECTED: i32 = -1004;
    pub const CODE_IO: i32 = -1005;

    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn not_found(key: &KeyId) -> Self {
        Self::new(Self::CODE_NOT_FOUND, format!("no value for {}", key))
    }

    pub fn disconnected() -> Self {
        Self::new(Self::CODE_DISCONNECTED, "product disconnected")
    }

    pub fn unsupported(key: &KeyId, operation: &str) -> Self {
        Self::new(
            Self::CODE_UNSUPPORTED,
            format!("{} does not support {}", key, operation),
        )
    }
}

/// A binding that could not deliver values
#[derive(Debug, Error)]
pub enum BindFailure {
    #[error("subscription to {key} rejected: {source}")]
    Rejected {
        key: KeyId,
        #[source]
        source: TransportError,
    },

    #[error("value pushed for {key} does not decode: {source}")]
    Decode {
        key: KeyId,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a get/set/action command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{key}: remote error {code}: {description}")]
    Remote {
        key: KeyId,
        code: i32,
        description: String,
    },

    #[error("{key}: no response within {timeout:?}")]
    Timeout { key: KeyId, timeout: Duration },

    #[error("{key}: cancelled")]
    Cancelled { key: KeyId },

    #[error("{key}: invalid value: {reason}")]
    InvalidValue { key: KeyId, reason: String },

    #[error("{key}: finished without a result")]
    NoResult { key: KeyId },

    #[error("{key}: {reason}")]
    Internal { key: KeyId, reason: String },

    #[error(transparent)]
    StoreClosed(#[from] StoreClosed),
}

impl CommandError {
    pub(crate) fn remote(key: &KeyId, err: TransportError) -> Self {
        CommandError::Remote {
            key: key.clone(),
            code: err.code,
            description: err.description,
        }
    }

    pub(crate) fn decode(key: &KeyId, err: serde_json::Error) -> Self {
        CommandError::InvalidValue {
            key: key.clone(),
            reason: err.to_string(),
        }
    }

    /// Remote error code, if the remote produced one
    pub fn code(&self) -> Option<i32> {
        match self {
            CommandError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Short text for a one-shot user notification
    pub fn description(&self) -> String {
        match self {
            CommandError::Remote { description, .. } => description.clone(),
            CommandError::Timeout { .. } => "The aircraft did not respond in time".to_string(),
            CommandError::Cancelled { .. } => "Cancelled".to_string(),
            CommandError::InvalidValue { reason, .. } => format!("Invalid value: {}", reason),
            CommandError::NoResult { .. } => "The command finished without a result".to_string(),
            CommandError::Internal { reason, .. } => reason.clone(),
            CommandError::StoreClosed(_) => "Not available".to_string(),
        }
    }
}

/// The store actor is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("keyed store is not running")]
pub struct StoreClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_keeps_code() {
        let key = KeyId::new("FlightController", "HeightLimit");
        let err = CommandError::remote(&key, TransportError::new(-7, "out of range"));
        assert_eq!(err.code(), Some(-7));
        assert_eq!(err.description(), "out of range");
        assert_eq!(
            err.to_string(),
            "FlightController.HeightLimit: remote error -7: out of range"
        );
    }

    #[test]
    fn test_store_closed_converts() {
        let err: CommandError = StoreClosed.into();
        assert_eq!(err.to_string(), "keyed store is not running");
        assert_eq!(err.code(), None);
    }
}
