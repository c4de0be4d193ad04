//! Typed completion events emitted by transports.
//!
//! Every request submitted to a [`Transport`](crate::transport::Transport)
//! completes by emitting exactly one event onto the channel attached for the
//! originating device address. Notifications and unexpected disconnects
//! arrive on the same channel, so a single receiver observes everything that
//! happens to a device in arrival order.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use sensorlink_types::{CharProperties, DeviceAddress, DiscoveredDevice, ServiceInfo};

/// An event for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Device the event originates from (or, for scans, the routing key the
    /// scan was submitted under).
    pub address: DeviceAddress,
    pub kind: EventKind,
}

impl TransportEvent {
    /// Create an event for `address`.
    pub fn new(address: impl Into<DeviceAddress>, kind: EventKind) -> Self {
        Self {
            address: address.into(),
            kind,
        }
    }
}

/// What happened.
///
/// Failure variants carry a human-readable reason from the underlying stack.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EventKind {
    ScanFinished { devices: Vec<DiscoveredDevice> },
    /// The adapter refused to start scanning.
    ScanFailed { reason: String },
    Connected,
    ConnectFailed { reason: String },
    Disconnected { reason: DisconnectReason },
    DisconnectFailed { reason: String },
    ServicesDiscovered { services: Vec<ServiceInfo> },
    DiscoveryFailed { reason: String },
    CharacteristicRead { uuid: Uuid, flags: CharProperties, value: Bytes },
    CharacteristicWritten { uuid: Uuid },
    DescriptorRead { uuid: Uuid, value: Bytes },
    DescriptorWritten { uuid: Uuid },
    /// A read of a characteristic or descriptor failed.
    ReadFailed { uuid: Uuid, reason: String },
    /// A write to a characteristic or descriptor failed.
    WriteFailed { uuid: Uuid, reason: String },
    Notification { uuid: Uuid, flags: CharProperties, value: Bytes },
    TransactionBegun,
    TransactionCommitted,
    TransactionFailed { reason: String },
    MtuChanged { mtu: u16 },
    MtuChangeFailed { reason: String },
}

impl EventKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ScanFinished { .. } => "scan_finished",
            EventKind::ScanFailed { .. } => "scan_failed",
            EventKind::Connected => "connected",
            EventKind::ConnectFailed { .. } => "connect_failed",
            EventKind::Disconnected { .. } => "disconnected",
            EventKind::DisconnectFailed { .. } => "disconnect_failed",
            EventKind::ServicesDiscovered { .. } => "services_discovered",
            EventKind::DiscoveryFailed { .. } => "discovery_failed",
            EventKind::CharacteristicRead { .. } => "characteristic_read",
            EventKind::CharacteristicWritten { .. } => "characteristic_written",
            EventKind::DescriptorRead { .. } => "descriptor_read",
            EventKind::DescriptorWritten { .. } => "descriptor_written",
            EventKind::ReadFailed { .. } => "read_failed",
            EventKind::WriteFailed { .. } => "write_failed",
            EventKind::Notification { .. } => "notification",
            EventKind::TransactionBegun => "transaction_begun",
            EventKind::TransactionCommitted => "transaction_committed",
            EventKind::TransactionFailed { .. } => "transaction_failed",
            EventKind::MtuChanged { .. } => "mtu_changed",
            EventKind::MtuChangeFailed { .. } => "mtu_change_failed",
        }
    }
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Disconnection requested through the transport.
    Requested,
    /// Disconnect requested while no link existed.
    AlreadyDisconnected,
    /// The remote side or the host stack dropped the link.
    LinkLost,
    /// BLE error occurred.
    BleError(String),
}

/// Sender half of a per-device event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half of a per-device event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a new event channel.
///
/// The channel is unbounded: transports never block or drop events, and the
/// flow drains events as fast as it processes steps.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel_preserves_order() {
        let (tx, mut rx) = event_channel();
        tx.send(TransportEvent::new("AA", EventKind::Connected)).unwrap();
        tx.send(TransportEvent::new(
            "AA",
            EventKind::ServicesDiscovered { services: vec![] },
        ))
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);
        assert_eq!(rx.recv().await.unwrap().kind.name(), "services_discovered");
    }

    #[test]
    fn test_disconnect_reason_serialization() {
        let json = serde_json::to_string(&DisconnectReason::LinkLost).unwrap();
        assert_eq!(json, "\"LinkLost\"");
    }
}
