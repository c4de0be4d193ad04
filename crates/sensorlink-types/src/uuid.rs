//! Bluetooth UUIDs and GATT constants shared by every transport.
//!
//! Instruments expose their own vendor services; the constants here are the
//! Bluetooth SIG assigned numbers the action-flow engine relies on.

use uuid::Uuid;

/// The Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
///
/// ```
/// use sensorlink_types::uuid::{from_short, CLIENT_CHARACTERISTIC_CONFIG};
///
/// assert_eq!(from_short(0x2902), CLIENT_CHARACTERISTIC_CONFIG);
/// ```
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

// --- Descriptors ---

/// Client Characteristic Configuration descriptor (CCCD).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = from_short(0x2902);

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that enables indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCCD value that disables both notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// --- Standard services ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = from_short(0x1800);

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = from_short(0x180a);

/// Battery service.
pub const BATTERY_SERVICE: Uuid = from_short(0x180f);

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = from_short(0x2a19);

// --- ATT sizing ---

/// MTU every LE link is guaranteed to support before negotiation.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Per-packet ATT overhead (opcode + handle) subtracted from the MTU to get
/// the largest write payload.
pub const ATT_WRITE_OVERHEAD: u16 = 3;
