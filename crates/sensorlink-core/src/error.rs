//! Error types for sensorlink-core.
//!
//! Two families of errors live here:
//!
//! - [`Error`] is returned from fallible API calls: constructing a
//!   transport, submitting a request, validating configuration.
//! - [`FlowError`] is the failure taxonomy of the action-flow engine. It is
//!   never returned from a function; a flow reports it exactly once through
//!   [`FlowListener::on_failure`](crate::flow::FlowListener::on_failure) and
//!   ends that run.
//!
//! # Recovery
//!
//! The engine never retries. A caller that wants to retry after a
//! [`FlowError`] calls `run()` again on the same flow, which restarts it from
//! the first step.
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`FlowError::TransportUnavailable`] | Do not retry; radio is off or absent |
//! | [`FlowError::ConnectFailed`] | Retry with backoff |
//! | [`FlowError::ConnectionLost`] | Re-run the flow |
//! | [`FlowError::NotFound`] | Do not retry; profile mismatch |
//! | [`FlowError::MissingConfiguration`] | Fix the flow definition |
//! | [`FlowError::StreamReadError`] | Fix the byte source, then re-run |

use core::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a transport or configuring the
/// pipeline.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable radio: adapter absent or powered off.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The address is not known to the transport.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation attempted while not connected to the device.
    #[error("Not connected to device {0}")]
    NotConnected(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payload decoding failed.
    #[error(transparent)]
    Parse(#[from] sensorlink_types::ParseError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// Result type alias using sensorlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of profile object a lookup was searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Service,
    Characteristic,
    Descriptor,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Service => f.write_str("service"),
            ObjectKind::Characteristic => f.write_str("characteristic"),
            ObjectKind::Descriptor => f.write_str("descriptor"),
        }
    }
}

/// Why a flow run ended without success.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FlowError {
    /// Radio absent or disabled; fatal to the whole session.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// The transport could not establish the link.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The transport could not tear down the link.
    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Service discovery failed.
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),

    /// A lookup step found no matching object under the active parent.
    #[error("{kind} {id} not found")]
    NotFound {
        /// What was being looked up.
        kind: ObjectKind,
        /// The UUID that was not found.
        id: Uuid,
    },

    /// A step was defined with an unusable configuration.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// A step needs a resolved service/characteristic/descriptor and none is active.
    #[error("missing target: {0}")]
    MissingTarget(String),

    /// The byte source of a `WriteStream` step failed.
    #[error("stream read error: {0}")]
    StreamReadError(String),

    /// The transport refused to start a scan.
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// `PickFirstDevice` ran without any device from the last scan.
    #[error("no device found")]
    NoDeviceFound,

    /// A read request failed.
    #[error("read of {uuid} failed: {reason}")]
    ReadFailed { uuid: Uuid, reason: String },

    /// A write request failed.
    #[error("write to {uuid} failed: {reason}")]
    WriteFailed { uuid: Uuid, reason: String },

    /// The transport refused to toggle notifications.
    #[error("could not change notification state of {0}")]
    NotifyFailed(Uuid),

    /// Begin/commit of a write transaction failed.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// MTU negotiation failed.
    #[error("MTU change failed: {0}")]
    MtuChangeFailed(String),

    /// The link dropped while a step other than `Disconnect` was in flight.
    #[error("connection lost")]
    ConnectionLost,
}

impl FlowError {
    /// Create a not-found error.
    pub fn not_found(kind: ObjectKind, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DeviceNotFound("AA:BB".to_string());
        assert_eq!(err.to_string(), "Device not found: AA:BB");

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));

        let err = Error::invalid_config("buffer_size must be >= 2");
        assert!(err.to_string().contains("buffer_size"));
    }

    #[test]
    fn test_flow_error_display() {
        let id = Uuid::from_u128(0xabc);
        let err = FlowError::not_found(ObjectKind::Characteristic, id);
        assert!(err.to_string().starts_with("characteristic "));
        assert!(err.to_string().ends_with("not found"));

        assert_eq!(FlowError::NoDeviceFound.to_string(), "no device found");
        assert!(
            FlowError::MissingConfiguration("scan timeout -1".into())
                .to_string()
                .contains("-1")
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = sensorlink_types::ParseError::InvalidValue("x".into());
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
