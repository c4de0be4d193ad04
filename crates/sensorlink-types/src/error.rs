//! Error types for data parsing in sensorlink-types.

use thiserror::Error;

/// Errors that can occur when decoding instrument payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in sensorlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than the format requires.
    #[error("Payload requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Bytes required by the format.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The payload decoded to something that is not a usable number.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Unknown payload format name.
    #[error("Unknown payload format: {0}")]
    UnknownFormat(String),
}

/// Result type alias using sensorlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
