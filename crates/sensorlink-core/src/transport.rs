//! Transport adapter abstraction.
//!
//! A [`Transport`] wraps a connection-oriented wireless link. Every request
//! method only *submits* work: an `Err` means the request could not even be
//! issued (unknown device, radio gone). The outcome of a submitted request is
//! always reported later as exactly one [`TransportEvent`] on the channel
//! attached for that address with [`Transport::attach`].
//!
//! Implementations in this crate:
//!
//! - [`BleTransport`](crate::ble::BleTransport) drives real hardware via btleplug.
//! - [`MockTransport`](crate::mock::MockTransport) scripts responses for tests.

use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use sensorlink_types::{ConnectionState, DeviceAddress, ScanFilter};

use crate::error::Result;
use crate::events::EventSender;

/// Where a characteristic lives in the remote profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Where a descriptor lives in the remote profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRef {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
}

impl CharacteristicRef {
    /// Reference a descriptor of this characteristic.
    pub fn descriptor(&self, descriptor: Uuid) -> DescriptorRef {
        DescriptorRef {
            service: self.service,
            characteristic: self.characteristic,
            descriptor,
        }
    }
}

/// Trait abstracting a connection-oriented wireless link.
///
/// The trait is object safe so flows can hold an `Arc<dyn Transport>` and
/// work unchanged over real radios and mocks.
///
/// # Event contract
///
/// | Request | Completion events |
/// |---------|-------------------|
/// | [`scan`](Self::scan) | `ScanFinished` or `ScanFailed` |
/// | [`connect`](Self::connect) | `Connected` or `ConnectFailed` |
/// | [`disconnect`](Self::disconnect) | `Disconnected` (also when already disconnected) or `DisconnectFailed` |
/// | [`discover_services`](Self::discover_services) | `ServicesDiscovered` or `DiscoveryFailed` |
/// | [`read_characteristic`](Self::read_characteristic) | `CharacteristicRead` or `ReadFailed` |
/// | [`read_descriptor`](Self::read_descriptor) | `DescriptorRead` or `ReadFailed` |
/// | [`write_characteristic`](Self::write_characteristic) | `CharacteristicWritten` or `WriteFailed` |
/// | [`write_descriptor`](Self::write_descriptor) | `DescriptorWritten` or `WriteFailed` |
/// | [`begin_transaction`](Self::begin_transaction) | `TransactionBegun` or `TransactionFailed` |
/// | [`commit`](Self::commit) | `TransactionCommitted` or `TransactionFailed` |
/// | [`change_mtu`](Self::change_mtu) | `MtuChanged` or `MtuChangeFailed` |
///
/// [`set_notification`](Self::set_notification) completes synchronously.
///
/// [`TransportEvent`]: crate::events::TransportEvent
pub trait Transport: Send + Sync {
    /// Whether the radio is present and enabled.
    fn is_available(&self) -> bool;

    /// Route events for `address` to `events`, replacing any previous route.
    fn attach(&self, address: &DeviceAddress, events: EventSender);

    /// Stop routing events for `address`.
    fn detach(&self, address: &DeviceAddress);

    /// Current link state of `address`.
    fn connection_state(&self, address: &DeviceAddress) -> ConnectionState;

    /// Scan for devices. `ScanFinished` is routed to `address`.
    fn scan(
        &self,
        address: &DeviceAddress,
        filter: &ScanFilter,
        timeout: Duration,
        max_devices: Option<usize>,
    ) -> Result<()>;

    fn connect(&self, address: &DeviceAddress) -> Result<()>;

    /// Tear the link down. Must emit `Disconnected` even when no link exists.
    fn disconnect(&self, address: &DeviceAddress) -> Result<()>;

    fn discover_services(&self, address: &DeviceAddress) -> Result<()>;

    fn read_characteristic(&self, address: &DeviceAddress, target: CharacteristicRef)
    -> Result<()>;

    fn write_characteristic(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        value: Bytes,
    ) -> Result<()>;

    fn read_descriptor(&self, address: &DeviceAddress, target: DescriptorRef) -> Result<()>;

    fn write_descriptor(
        &self,
        address: &DeviceAddress,
        target: DescriptorRef,
        value: Bytes,
    ) -> Result<()>;

    /// Toggle local delivery of notifications for a characteristic.
    ///
    /// Returns `false` when the stack refuses. The remote side only starts
    /// sending once the CCCD descriptor is written as well.
    fn set_notification(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        enable: bool,
    ) -> bool;

    fn begin_transaction(&self, address: &DeviceAddress) -> Result<()>;

    fn commit(&self, address: &DeviceAddress) -> Result<()>;

    fn change_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<()>;
}
