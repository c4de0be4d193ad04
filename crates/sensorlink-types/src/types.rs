//! Core types for instrument discovery, GATT profiles and recorded data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a remote device.
///
/// On Linux and Windows this is the Bluetooth MAC address
/// (e.g. `AA:BB:CC:DD:EE:FF`); on macOS it is the CoreBluetooth peripheral
/// UUID. Comparison is case-insensitive so the two spellings of a MAC
/// address route to the same flow.
#[derive(Debug, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create an address from any string-like identifier.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_string())
    }

    /// The address as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this address has been bound to a real device yet.
    ///
    /// Flows that start with a scan are created with an unbound address and
    /// rebind once `PickFirstDevice` runs.
    pub fn is_unbound(&self) -> bool {
        self.0.is_empty()
    }

    /// Placeholder address used before a scan picks a device.
    pub fn unbound() -> Self {
        Self(String::new())
    }
}

impl PartialEq for DeviceAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl core::hash::Hash for DeviceAddress {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<unbound>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Connection state of a device as tracked by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link establishment in progress.
    Connecting,
    /// Link up, profile not yet discovered.
    Connected,
    /// Service discovery in progress.
    Discovering,
    /// Link up and profile discovered.
    Ready,
}

impl ConnectionState {
    /// Whether a link exists in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Discovering | ConnectionState::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Filter applied to scan results.
///
/// An empty filter matches every advertising device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanFilter {
    /// Match devices advertising any of these services.
    pub services: Vec<Uuid>,
    /// Match devices whose local name starts with this prefix (case-insensitive).
    pub name_prefix: Option<String>,
}

impl ScanFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require one of the given services to be advertised.
    #[must_use]
    pub fn service(mut self, uuid: Uuid) -> Self {
        self.services.push(uuid);
        self
    }

    /// Require a local name prefix.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Whether a device with the given advertisement matches this filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        let service_ok =
            self.services.is_empty() || self.services.iter().any(|s| services.contains(s));
        let name_ok = match (&self.name_prefix, name) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(prefix), Some(name)) => name
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
        };
        service_ok && name_ok
    }
}

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscoveredDevice {
    /// Address to connect to.
    pub address: DeviceAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

/// GATT characteristic property bits, as reported by the remote profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharProperties(pub u8);

impl CharProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    /// Whether every bit in `mask` is set.
    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Whether the characteristic can push values (notify or indicate).
    pub fn can_notify(&self) -> bool {
        self.0 & (Self::NOTIFY | Self::INDICATE) != 0
    }
}

/// A characteristic of a discovered service.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharProperties,
    /// Descriptor UUIDs attached to this characteristic.
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    /// Whether a descriptor with this UUID is attached.
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// A service of a discovered remote profile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Find a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// One accepted sample, as delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorData {
    /// Value after the filter chain.
    pub value: f64,
    /// Value as decoded from the instrument, before filtering.
    pub raw: f64,
    /// Properties of the characteristic the value arrived on.
    pub flags: CharProperties,
}

/// Summary statistics of one recorded run of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunStats {
    pub minimum: f64,
    pub maximum: f64,
    pub average: f64,
    /// Number of tier-0 points recorded.
    pub count: u64,
    /// Span between the first and last recorded timestamps.
    pub total_duration_millis: i64,
    /// Highest tier that received data.
    pub zoom_tiers: u32,
    /// Decimation factor between neighbouring tiers (`buffer_size / 2`).
    pub zoom_level_between_tiers: u32,
}
