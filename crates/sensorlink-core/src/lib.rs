//! Acquisition pipeline for BLE scientific instruments.
//!
//! This crate drives connection-oriented wireless instruments through a
//! declarative sequence of steps and turns the values they stream into
//! multi-resolution time series.
//!
//! # Features
//!
//! - **Action flows**: scripted scan, connect, discover, read, write,
//!   subscribe and disconnect sequences ([`flow`]), driven per device by a
//!   tokio task ([`runner`])
//! - **Transport abstraction**: a submit-then-event [`Transport`] trait with
//!   a btleplug implementation ([`ble`]) and a scriptable mock ([`mock`])
//! - **Signal filters**: linear rescaling and windowed frequency extraction
//!   ([`filter`])
//! - **Zoom recording**: min/max decimation into a pyramid of tiers ([`zoom`])
//! - **Recording sessions**: filter, record, summarize and observe one sensor
//!   of one run ([`session`])
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use sensorlink_core::flow::FlowBuilder;
//! use sensorlink_core::mock::MockTransport;
//! use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
//! use sensorlink_core::uuids::from_short;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let service = from_short(0x181a);
//! let temperature = from_short(0x2a6e);
//! let mock = Arc::new(
//!     MockTransport::builder()
//!         .notifying_service(service, &[temperature])
//!         .build(),
//! );
//!
//! let (listener, mut signals) = ChannelListener::new();
//! let runner = FlowRunner::spawn(mock.clone(), "AA:BB:CC:DD:EE:FF", listener);
//! runner.build(
//!     FlowBuilder::new()
//!         .connect()
//!         .lookup_service(service)
//!         .lookup_characteristic(temperature)
//!         .enable_notify()
//!         .build(),
//! );
//! runner.run();
//!
//! while let Some(signal) = signals.recv().await {
//!     if signal.is_terminal() {
//!         assert_eq!(signal, FlowSignal::Success);
//!         break;
//!     }
//! }
//! runner.close().await;
//! # }
//! ```

pub mod ble;
pub mod error;
pub mod events;
pub mod filter;
pub mod flow;
pub mod mock;
pub mod runner;
pub mod session;
pub mod transport;
pub mod zoom;

pub use sensorlink_types::types;
pub use sensorlink_types::uuids;

pub use ble::{BleTransport, BleTransportConfig};
pub use error::{Error, FlowError, ObjectKind, Result};
pub use events::{DisconnectReason, EventKind, TransportEvent};
pub use filter::{FilterChain, FilterConfig, ScaleFilter, ScaleRange, ValueFilter};
pub use flow::{ActionFlow, FlowBuilder, FlowListener, Step};
pub use mock::MockTransport;
pub use runner::{ChannelListener, FlowRunner, FlowSignal};
pub use session::{RecordingSession, SensorObserver, StatsAccumulator};
pub use transport::{CharacteristicRef, DescriptorRef, Transport};
pub use zoom::{RecorderConfig, ZoomRecorder};
