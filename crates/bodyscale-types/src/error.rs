//! Error types for frame decoding in bodyscale-types.

use thiserror::Error;

use crate::types::MeasurementCharacteristic;

/// Errors that can occur when decoding a measurement frame.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in bodyscale-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The frame is shorter than the fields its flags declare.
    #[error("{characteristic} frame requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Characteristic that delivered the frame.
        characteristic: MeasurementCharacteristic,
        /// Minimum length implied by the flags.
        expected: usize,
        /// Actual frame length.
        actual: usize,
    },

    /// A body composition frame did not set the weight-present flag.
    #[error("body composition frame carries no weight (flags 0x{flags:04X})")]
    MissingWeight {
        /// The raw flags field.
        flags: u16,
    },
}

/// Result type alias using bodyscale-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
