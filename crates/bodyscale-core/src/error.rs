//! Error types for bodyscale-core.
//!
//! This module defines every error the engine can produce while discovering,
//! connecting to, and reading from a scale.
//!
//! # How the engine reacts
//!
//! | Error Type | Engine reaction | Surfaced as |
//! |------------|-----------------|-------------|
//! | [`Error::TransportUnavailable`] | Session ends, no reconnect | `Error` event, state `Error` |
//! | [`Error::DeviceNotFound`] | Scan ends | recoverable `Error` event, state `Disconnected` |
//! | [`Error::Timeout`] | Reconnect policy if armed | `Error` event, state `Error` |
//! | [`Error::ConnectionFailed`] | Reconnect policy if armed | `Error` event, state `Error` |
//! | [`Error::SubscriptionFailed`] | Link is dropped | `Error` event, state `Error` |
//! | [`Error::Decode`] | Frame dropped, session continues | recoverable `Error` event |
//! | [`Error::OutOfRange`] | Reading dropped | debug log only |
//! | [`Error::ReconnectExhausted`] | Policy stops | `ReconnectExhausted` event |
//!
//! Callers map any error to a stable [`ErrorCode`] with [`Error::code`], and
//! get a user-facing hint from [`Error::suggestion`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bodyscale_types::{MeasurementCharacteristic, ParseError};

use crate::registry::RegistryError;

/// Everything that can go wrong between the radio and an accepted measurement.
///
/// Marked `#[non_exhaustive]`; match with a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the btleplug stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio is missing, powered off, or was lost.
    #[error("Bluetooth transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No matching scale was seen, or the radio does not know the identifier.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The link could not be brought up.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Scale identifier, when known.
        device_id: Option<String>,
        /// What went wrong.
        reason: ConnectionFailureReason,
    },

    /// Enabling notifications on a measurement characteristic failed.
    #[error("Subscription to {characteristic} failed: {reason}")]
    SubscriptionFailed {
        /// The characteristic that could not be subscribed.
        characteristic: MeasurementCharacteristic,
        /// Why it failed.
        reason: String,
    },

    /// A notification could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] ParseError),

    /// A reading fell outside the plausible weight range.
    #[error("Weight {weight_kg} kg is outside the plausible range")]
    OutOfRange {
        /// The rejected weight.
        weight_kg: f64,
    },

    /// Automatic reconnection gave up.
    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Operation attempted while not connected to a scale.
    #[error("Not connected to device")]
    NotConnected,

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// An [`EngineConfig`](crate::EngineConfig) value is out of bounds.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The device registry could not be read or written.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Why a connect failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The link dropped before the session was established.
    LinkLost,
    /// Anything the radio reported.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkLost => f.write_str("link lost while connecting"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// Why no scale was found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// The radio has never seen this identifier.
    NotFound { identifier: String },
    /// The scan window closed first.
    ScanTimeout { duration: Duration },
    /// There is no adapter to scan with.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "no scale with identifier '{identifier}'"),
            Self::ScanTimeout { duration } => write!(f, "nothing matched within {duration:?}"),
            Self::NoAdapter => f.write_str("no Bluetooth adapter available"),
        }
    }
}

/// Stable, serializable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// No usable radio.
    TransportUnavailable,
    /// Nothing matching was found.
    DeviceNotFound,
    /// Connecting took too long.
    ConnectionTimeout,
    /// The link could not be established or was lost while connecting.
    ConnectionFailed,
    /// Notifications could not be enabled.
    SubscriptionFailed,
    /// A frame could not be decoded.
    DecodeError,
    /// A weight was outside the plausible range.
    OutOfRange,
    /// Automatic reconnection gave up.
    ReconnectExhausted,
    /// Configuration, storage, or cancellation problems.
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            Self::DecodeError => "DECODE_ERROR",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            Self::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Shorthand for an unknown identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// `operation` did not finish within `duration`.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a subscription failure.
    pub fn subscription_failed(
        characteristic: MeasurementCharacteristic,
        reason: impl Into<String>,
    ) -> Self {
        Self::SubscriptionFailed {
            characteristic,
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TransportUnavailable(_) | Self::DeviceNotFound(DeviceNotFoundReason::NoAdapter) => {
                ErrorCode::TransportUnavailable
            }
            Self::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            Self::Timeout { .. } => ErrorCode::ConnectionTimeout,
            Self::Bluetooth(_) | Self::ConnectionFailed { .. } | Self::NotConnected => {
                ErrorCode::ConnectionFailed
            }
            Self::SubscriptionFailed { .. } => ErrorCode::SubscriptionFailed,
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::OutOfRange { .. } => ErrorCode::OutOfRange,
            Self::ReconnectExhausted { .. } => ErrorCode::ReconnectExhausted,
            Self::Cancelled | Self::InvalidConfig(_) | Self::Registry(_) => ErrorCode::Internal,
        }
    }

    /// Whether the session can carry on, or a retry can succeed, without the
    /// user changing anything.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.code(),
            ErrorCode::TransportUnavailable | ErrorCode::ReconnectExhausted | ErrorCode::Internal
        )
    }

    /// A short hint for the user.
    pub fn suggestion(&self) -> Option<&'static str> {
        let hint = match self.code() {
            ErrorCode::TransportUnavailable => "Turn Bluetooth on and check adapter permissions.",
            ErrorCode::DeviceNotFound => "Step on the scale to wake it, then scan again.",
            ErrorCode::ConnectionTimeout | ErrorCode::ConnectionFailed => {
                "Move closer to the scale and make sure no other app is connected to it."
            }
            ErrorCode::SubscriptionFailed => {
                "The scale may not support standard measurements. Forget it and pair again."
            }
            ErrorCode::DecodeError => "Keep standing still; the next reading may decode.",
            ErrorCode::ReconnectExhausted => "Wake the scale and reconnect manually.",
            ErrorCode::OutOfRange | ErrorCode::Internal => return None,
        };
        Some(hint)
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));

        let err = Error::subscription_failed(MeasurementCharacteristic::WeightScale, "not found");
        assert_eq!(
            err.to_string(),
            "Subscription to Weight Measurement failed: not found"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::TransportUnavailable("off".into()).code(),
            ErrorCode::TransportUnavailable
        );
        assert_eq!(
            Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter).code(),
            ErrorCode::TransportUnavailable
        );
        assert_eq!(
            Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: Duration::from_secs(10)
            })
            .code(),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            Error::timeout("connect", Duration::from_secs(1)).code(),
            ErrorCode::ConnectionTimeout
        );
        assert_eq!(
            Error::connection_failed(None, ConnectionFailureReason::LinkLost).code(),
            ErrorCode::ConnectionFailed
        );
        assert_eq!(
            Error::from(ParseError::MissingWeight { flags: 0 }).code(),
            ErrorCode::DecodeError
        );
        assert_eq!(
            Error::ReconnectExhausted { attempts: 5 }.code(),
            ErrorCode::ReconnectExhausted
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::from(ParseError::MissingWeight { flags: 0 }).is_recoverable());
        assert!(Error::timeout("connect", Duration::from_secs(1)).is_recoverable());
        assert!(!Error::TransportUnavailable("lost".into()).is_recoverable());
        assert!(!Error::ReconnectExhausted { attempts: 5 }.is_recoverable());
        assert!(!Error::invalid_config("bad").is_recoverable());
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::TransportUnavailable("off".into()).suggestion().is_some());
        assert!(Error::OutOfRange { weight_kg: 500.0 }.suggestion().is_none());
    }

    #[test]
    fn test_error_code_serde() {
        let json = serde_json::to_string(&ErrorCode::ConnectionTimeout).unwrap();
        assert_eq!(json, "\"CONNECTION_TIMEOUT\"");
        assert_eq!(ErrorCode::ConnectionTimeout.to_string(), "CONNECTION_TIMEOUT");
    }

    #[test]
    fn test_not_found_messages() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter);
        assert_eq!(err.to_string(), "Device not found: no Bluetooth adapter available");

        let err = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            duration: Duration::from_secs(30),
        });
        assert_eq!(err.to_string(), "Device not found: nothing matched within 30s");
    }

    #[test]
    fn test_registry_errors_are_internal() {
        let err = Error::from(RegistryError::Unavailable("poisoned".into()));
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(!err.is_recoverable());
    }
}
