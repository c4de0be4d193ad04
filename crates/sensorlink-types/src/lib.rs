//! Platform-agnostic types for BLE instrument acquisition.
//!
//! This crate provides the shared vocabulary used by the transport,
//! action-flow engine, recorder and persistence layers:
//!
//! - Device addresses, connection states and scan filters
//! - Descriptions of a discovered GATT profile (services, characteristics,
//!   descriptors)
//! - Scalar payload decoding ([`PayloadFormat`])
//! - The [`RecordingSink`] persistence trait and run statistics
//! - Bluetooth SIG UUID constants
//!
//! # Example
//!
//! ```
//! use sensorlink_types::{MemorySink, PayloadFormat, RecordingSink};
//!
//! let value = PayloadFormat::I16Le.decode(&[0x0A, 0x00]).unwrap();
//! let mut sink = MemorySink::new();
//! sink.add_scalar_reading("run-1", "thermometer", 0, 1_000, value);
//! assert_eq!(sink.tier_len(0), 1);
//! ```

pub mod decode;
pub mod error;
pub mod sink;
pub mod types;
pub mod uuid;

pub use decode::PayloadFormat;
pub use error::{ParseError, ParseResult};
pub use sink::{MemorySink, RecordingSink, StoredPoint};
pub use types::{
    CharProperties, CharacteristicInfo, ConnectionState, DeviceAddress, DiscoveredDevice,
    RunStats, ScanFilter, SensorData, ServiceInfo,
};
pub use self::uuid as uuids;
