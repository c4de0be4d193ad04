//! Action-flow engine.
//!
//! An [`ActionFlow`] executes an ordered list of [`Step`]s against one device,
//! one step at a time. A step that needs the transport submits a request and
//! suspends the flow until the matching completion event arrives through
//! [`ActionFlow::handle_event`]; steps that only touch local state (lookups,
//! device selection) complete immediately.
//!
//! The flow itself is a plain synchronous state machine. It never blocks and
//! never spawns; [`FlowRunner`](crate::runner::FlowRunner) wraps it in a
//! per-device task that feeds it events in arrival order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sensorlink_core::events::event_channel;
//! use sensorlink_core::flow::{ActionFlow, FlowBuilder};
//! use sensorlink_core::mock::MockTransport;
//! use sensorlink_core::runner::{ChannelListener, FlowSignal};
//! use uuid::Uuid;
//!
//! let service = Uuid::from_u128(0x1000);
//! let characteristic = Uuid::from_u128(0x1001);
//! let mock = Arc::new(
//!     MockTransport::builder()
//!         .notifying_service(service, &[characteristic])
//!         .value(characteristic, vec![0x2a])
//!         .build(),
//! );
//!
//! let (events, mut incoming) = event_channel();
//! let (listener, mut signals) = ChannelListener::new();
//! let mut flow = ActionFlow::new(mock, "AA:BB:CC:DD:EE:FF", events, listener);
//! flow.build(
//!     FlowBuilder::new()
//!         .connect()
//!         .lookup_service(service)
//!         .lookup_characteristic(characteristic)
//!         .read()
//!         .build(),
//! );
//! flow.run();
//! while let Ok(event) = incoming.try_recv() {
//!     flow.handle_event(event);
//! }
//!
//! let mut last = None;
//! while let Ok(signal) = signals.try_recv() {
//!     last = Some(signal);
//! }
//! assert_eq!(last, Some(FlowSignal::Success));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sensorlink_types::uuid::{
    ATT_WRITE_OVERHEAD, CLIENT_CHARACTERISTIC_CONFIG, DEFAULT_ATT_MTU,
    DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use sensorlink_types::{
    CharProperties, CharacteristicInfo, DeviceAddress, DiscoveredDevice, ScanFilter, ServiceInfo,
};

use crate::error::{Error, FlowError, ObjectKind, Result};
use crate::events::{EventKind, EventSender, TransportEvent};
use crate::transport::{CharacteristicRef, DescriptorRef, Transport};

type Opener = dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync;

/// Byte source for a [`Step::WriteStream`].
///
/// The source is re-openable: every run of a flow opens a fresh reader, so a
/// re-run streams the data again from the beginning.
#[derive(Clone)]
pub struct StreamSource {
    label: String,
    opener: Arc<Opener>,
}

impl StreamSource {
    /// Stream an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self {
            label: format!("{} byte buffer", data.len()),
            opener: Arc::new(move || Ok(Box::new(data.clone().reader()) as Box<dyn Read + Send>)),
        }
    }

    /// Stream the contents of a file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        Self {
            label: path.display().to_string(),
            opener: Arc::new(move || {
                let file = std::fs::File::open(&path)?;
                Ok(Box::new(io::BufReader::new(file)) as Box<dyn Read + Send>)
            }),
        }
    }

    /// Stream whatever `open` returns. Called once per run.
    pub fn from_fn<F, R>(label: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> io::Result<R> + Send + Sync + 'static,
        R: Read + Send + 'static,
    {
        Self {
            label: label.into(),
            opener: Arc::new(move || open().map(|r| Box::new(r) as Box<dyn Read + Send>)),
        }
    }

    /// Human-readable description for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        (self.opener)()
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// One declarative step of a flow.
///
/// Each step carries the data it needs.
#[derive(Debug, Clone)]
pub enum Step {
    /// Scan for devices. A negative timeout is a configuration error.
    Scan {
        filter: ScanFilter,
        timeout_secs: i64,
        max_devices: Option<usize>,
    },
    /// Rebind the flow to the first device of the most recent scan.
    PickFirstDevice,
    /// Connect and discover the remote profile.
    Connect,
    Disconnect,
    BeginTransaction,
    Commit,
    /// Request an ATT MTU. The granted value sizes later `WriteStream` chunks.
    ChangeMtu(u16),
    LookupService(Uuid),
    /// Resolve a characteristic of the active service.
    LookupCharacteristic(Uuid),
    /// Resolve a descriptor of the active characteristic.
    LookupDescriptor(Uuid),
    /// Read the active descriptor, or the active characteristic if none.
    Read,
    /// Write the active descriptor, or the active characteristic if none.
    Write(Bytes),
    /// Write a byte source to the active characteristic in MTU-sized chunks.
    WriteStream(StreamSource),
    /// Enable notifications on the active characteristic.
    ///
    /// Writes the CCCD, then leaves the characteristic as the active target.
    EnableNotify,
    /// Disable notifications on the active characteristic.
    DisableNotify,
}

impl Step {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Scan { .. } => "scan",
            Step::PickFirstDevice => "pick_first_device",
            Step::Connect => "connect",
            Step::Disconnect => "disconnect",
            Step::BeginTransaction => "begin_transaction",
            Step::Commit => "commit",
            Step::ChangeMtu(_) => "change_mtu",
            Step::LookupService(_) => "lookup_service",
            Step::LookupCharacteristic(_) => "lookup_characteristic",
            Step::LookupDescriptor(_) => "lookup_descriptor",
            Step::Read => "read",
            Step::Write(_) => "write",
            Step::WriteStream(_) => "write_stream",
            Step::EnableNotify => "enable_notify",
            Step::DisableNotify => "disable_notify",
        }
    }
}

/// Fluent construction of a step list.
///
/// ```
/// use sensorlink_core::flow::FlowBuilder;
/// use sensorlink_types::ScanFilter;
///
/// let steps = FlowBuilder::new()
///     .scan(ScanFilter::new(), 5, Some(1))
///     .pick_first_device()
///     .connect()
///     .build();
/// assert_eq!(steps.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlowBuilder {
    steps: Vec<Step>,
}

impl FlowBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn scan(self, filter: ScanFilter, timeout_secs: i64, max_devices: Option<usize>) -> Self {
        self.step(Step::Scan {
            filter,
            timeout_secs,
            max_devices,
        })
    }

    #[must_use]
    pub fn pick_first_device(self) -> Self {
        self.step(Step::PickFirstDevice)
    }

    #[must_use]
    pub fn connect(self) -> Self {
        self.step(Step::Connect)
    }

    #[must_use]
    pub fn disconnect(self) -> Self {
        self.step(Step::Disconnect)
    }

    #[must_use]
    pub fn begin_transaction(self) -> Self {
        self.step(Step::BeginTransaction)
    }

    #[must_use]
    pub fn commit(self) -> Self {
        self.step(Step::Commit)
    }

    #[must_use]
    pub fn change_mtu(self, mtu: u16) -> Self {
        self.step(Step::ChangeMtu(mtu))
    }

    #[must_use]
    pub fn lookup_service(self, uuid: Uuid) -> Self {
        self.step(Step::LookupService(uuid))
    }

    #[must_use]
    pub fn lookup_characteristic(self, uuid: Uuid) -> Self {
        self.step(Step::LookupCharacteristic(uuid))
    }

    #[must_use]
    pub fn lookup_descriptor(self, uuid: Uuid) -> Self {
        self.step(Step::LookupDescriptor(uuid))
    }

    #[must_use]
    pub fn read(self) -> Self {
        self.step(Step::Read)
    }

    #[must_use]
    pub fn write(self, value: impl Into<Bytes>) -> Self {
        self.step(Step::Write(value.into()))
    }

    #[must_use]
    pub fn write_stream(self, source: StreamSource) -> Self {
        self.step(Step::WriteStream(source))
    }

    #[must_use]
    pub fn enable_notify(self) -> Self {
        self.step(Step::EnableNotify)
    }

    #[must_use]
    pub fn disable_notify(self) -> Self {
        self.step(Step::DisableNotify)
    }

    /// Finish and return the steps in call order.
    pub fn build(self) -> Vec<Step> {
        self.steps
    }
}

/// Callbacks of a flow.
///
/// All methods have empty defaults. Calls are serialized: a listener is
/// only ever invoked from the flow's own event processing.
pub trait FlowListener: Send {
    fn on_scan_finished(&mut self, _devices: &[DiscoveredDevice]) {}

    fn on_connect(&mut self) {}

    fn on_services_discovered(&mut self, _services: &[ServiceInfo]) {}

    fn on_notification(&mut self, _uuid: Uuid, _flags: CharProperties, _value: &[u8]) {}

    fn on_characteristic_read(&mut self, _uuid: Uuid, _flags: CharProperties, _value: &[u8]) {}

    fn on_descriptor_read(&mut self, _uuid: Uuid, _value: &[u8]) {}

    /// A characteristic write completed (once per chunk for streamed writes).
    fn on_characteristic_write(&mut self, _uuid: Uuid) {}

    /// Called as soon as the CCCD write is submitted, before it completes.
    fn on_notification_subscribed(&mut self, _uuid: Uuid) {}

    /// Called as soon as the CCCD write is submitted, before it completes.
    fn on_notification_unsubscribed(&mut self, _uuid: Uuid) {}

    fn on_disconnect(&mut self) {}

    /// Every step completed.
    fn on_success(&mut self) {}

    /// The run ended at a failed step.
    fn on_failure(&mut self, _error: &FlowError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Ended,
}

/// Completion the current step is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    ScanFinished,
    Connected,
    ServicesDiscovered,
    Disconnected,
    CharacteristicRead(Uuid),
    DescriptorRead(Uuid),
    CharacteristicWritten(Uuid),
    DescriptorWritten(Uuid),
    TransactionBegun,
    TransactionCommitted,
    MtuChanged,
}

enum Dispatch {
    Await(Awaiting),
    Next,
    Fail(FlowError),
}

/// Currently resolved profile objects.
#[derive(Debug, Default)]
struct Target {
    service: Option<Uuid>,
    characteristic: Option<CharacteristicInfo>,
    descriptor: Option<Uuid>,
}

/// Executes a list of steps against one device.
///
/// See the [module documentation](self) for an example.
pub struct ActionFlow {
    transport: Arc<dyn Transport>,
    address: DeviceAddress,
    events: EventSender,
    listener: Box<dyn FlowListener>,
    steps: Vec<Step>,
    cursor: usize,
    phase: Phase,
    awaiting: Option<Awaiting>,
    services: Vec<ServiceInfo>,
    target: Target,
    last_scan: Vec<DiscoveredDevice>,
    mtu: u16,
    stream: Option<Box<dyn Read + Send>>,
    subscribed: HashSet<Uuid>,
}

impl fmt::Debug for ActionFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFlow")
            .field("address", &self.address)
            .field("steps", &self.steps.len())
            .field("cursor", &self.cursor)
            .field("phase", &self.phase)
            .field("awaiting", &self.awaiting)
            .field("mtu", &self.mtu)
            .finish_non_exhaustive()
    }
}

impl ActionFlow {
    /// Create a flow bound to `address`.
    ///
    /// Events for the address are routed to `events`; the caller feeds what
    /// arrives on the matching receiver into [`handle_event`](Self::handle_event).
    /// An unbound address is fine for flows that start with a scan followed
    /// by [`Step::PickFirstDevice`].
    pub fn new(
        transport: Arc<dyn Transport>,
        address: impl Into<DeviceAddress>,
        events: EventSender,
        listener: impl FlowListener + 'static,
    ) -> Self {
        let address = address.into();
        transport.attach(&address, events.clone());
        Self {
            transport,
            address,
            events,
            listener: Box::new(listener),
            steps: Vec::new(),
            cursor: 0,
            phase: Phase::Idle,
            awaiting: None,
            services: Vec::new(),
            target: Target::default(),
            last_scan: Vec::new(),
            mtu: DEFAULT_ATT_MTU,
            stream: None,
            subscribed: HashSet::new(),
        }
    }

    /// The device this flow currently talks to.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Whether the last run reported success or failure.
    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// MTU last granted by the transport.
    pub fn negotiated_mtu(&self) -> u16 {
        self.mtu
    }

    /// Index of the step being executed (or about to be, when idle).
    pub fn step_index(&self) -> usize {
        self.cursor
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Profile from the last service discovery.
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Whether notifications of `uuid` are currently subscribed.
    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.subscribed.contains(&uuid)
    }

    /// Replace the step list. Ignored while running.
    pub fn build(&mut self, steps: Vec<Step>) {
        if self.is_running() {
            warn!("Flow {} is running, ignoring build", self.address);
            return;
        }
        self.steps = steps;
        self.cursor = 0;
        self.phase = Phase::Idle;
    }

    /// Start executing from the first step.
    ///
    /// A no-op while the flow is already running. After a run ended, this
    /// starts a fresh run of the same steps.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    pub fn run(&mut self) {
        if self.is_running() {
            debug!("Flow already running, ignoring run()");
            return;
        }

        self.cursor = 0;
        self.awaiting = None;
        self.stream = None;
        self.target = Target::default();
        self.phase = Phase::Running;

        if !self.transport.is_available() {
            self.fail(FlowError::TransportUnavailable);
            return;
        }

        debug!("Starting flow with {} step(s)", self.steps.len());
        self.pump();
    }

    /// Clear steps, cursors and subscriptions and go idle.
    ///
    /// Does not disconnect the device.
    pub fn reset(&mut self) {
        debug!("Resetting flow for {}", self.address);
        self.steps.clear();
        self.cursor = 0;
        self.phase = Phase::Idle;
        self.awaiting = None;
        self.target = Target::default();
        self.last_scan.clear();
        self.stream = None;
        self.subscribed.clear();
    }

    /// Stop receiving events for the device and reset.
    pub fn close(&mut self) {
        self.transport.detach(&self.address);
        self.reset();
    }

    /// Process one event from the transport.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if event.address != self.address {
            debug!(
                "Flow {} ignoring {} for {}",
                self.address,
                event.kind.name(),
                event.address
            );
            return;
        }

        match event.kind {
            EventKind::Disconnected { reason } => {
                debug!("Device {} disconnected: {:?}", self.address, reason);
                self.link_down();
            }
            EventKind::ConnectFailed { reason } if !self.is_running() => {
                debug!("Device {} connect failed after flow end: {}", self.address, reason);
                self.listener.on_disconnect();
            }
            EventKind::Notification { uuid, flags, value } => {
                if self.is_running() || self.subscribed.contains(&uuid) {
                    self.listener.on_notification(uuid, flags, &value);
                } else {
                    debug!("Dropping notification from unsubscribed {}", uuid);
                }
            }
            kind if !self.is_running() => {
                debug!("Flow {} not running, ignoring {}", self.address, kind.name());
            }
            kind => self.complete(kind),
        }
    }

    fn link_down(&mut self) {
        self.subscribed.clear();
        self.services.clear();
        self.mtu = DEFAULT_ATT_MTU;
        self.listener.on_disconnect();

        if !self.is_running() {
            return;
        }
        if self.awaiting == Some(Awaiting::Disconnected) {
            self.advance();
        } else {
            self.fail(FlowError::ConnectionLost);
        }
    }

    fn complete(&mut self, kind: EventKind) {
        let Some(awaiting) = self.awaiting else {
            debug!("Flow {} awaiting nothing, dropping {}", self.address, kind.name());
            return;
        };

        match (awaiting, kind) {
            (Awaiting::ScanFinished, EventKind::ScanFinished { devices }) => {
                info!("Scan found {} device(s)", devices.len());
                self.listener.on_scan_finished(&devices);
                self.last_scan = devices;
                self.advance();
            }
            (Awaiting::ScanFinished, EventKind::ScanFailed { reason }) => {
                self.fail(FlowError::ScanFailed(reason));
            }
            (Awaiting::Connected, EventKind::Connected) => {
                info!("Connected to {}", self.address);
                self.listener.on_connect();
                // A connect step is only done once the profile is known.
                match self.transport.discover_services(&self.address) {
                    Ok(()) => self.awaiting = Some(Awaiting::ServicesDiscovered),
                    Err(Error::TransportUnavailable(_)) => {
                        self.fail(FlowError::TransportUnavailable)
                    }
                    Err(e) => self.fail(FlowError::DiscoveryFailed(e.to_string())),
                }
            }
            (Awaiting::Connected, EventKind::ConnectFailed { reason }) => {
                self.fail(FlowError::ConnectFailed(reason));
            }
            (Awaiting::ServicesDiscovered, EventKind::ServicesDiscovered { services }) => {
                debug!("Discovered {} service(s) on {}", services.len(), self.address);
                self.listener.on_services_discovered(&services);
                self.services = services;
                self.advance();
            }
            (Awaiting::ServicesDiscovered, EventKind::DiscoveryFailed { reason }) => {
                self.fail(FlowError::DiscoveryFailed(reason));
            }
            (Awaiting::Disconnected, EventKind::DisconnectFailed { reason }) => {
                self.fail(FlowError::DisconnectFailed(reason));
            }
            (
                Awaiting::CharacteristicRead(expected),
                EventKind::CharacteristicRead { uuid, flags, value },
            ) if uuid == expected => {
                self.listener.on_characteristic_read(uuid, flags, &value);
                self.advance();
            }
            (Awaiting::DescriptorRead(expected), EventKind::DescriptorRead { uuid, value })
                if uuid == expected =>
            {
                self.listener.on_descriptor_read(uuid, &value);
                self.advance();
            }
            (
                Awaiting::CharacteristicRead(expected) | Awaiting::DescriptorRead(expected),
                EventKind::ReadFailed { uuid, reason },
            ) if uuid == expected => {
                self.fail(FlowError::ReadFailed { uuid, reason });
            }
            (Awaiting::CharacteristicWritten(expected), EventKind::CharacteristicWritten { uuid })
                if uuid == expected =>
            {
                self.listener.on_characteristic_write(uuid);
                if matches!(self.steps.get(self.cursor), Some(Step::WriteStream(_))) {
                    // Same step again for the next chunk.
                    self.awaiting = None;
                    self.pump();
                } else {
                    self.advance();
                }
            }
            (Awaiting::DescriptorWritten(expected), EventKind::DescriptorWritten { uuid })
                if uuid == expected =>
            {
                // The CCCD was only the target of the toggle itself.
                if matches!(
                    self.steps.get(self.cursor),
                    Some(Step::EnableNotify | Step::DisableNotify)
                ) {
                    self.target.descriptor = None;
                }
                self.advance();
            }
            (
                Awaiting::CharacteristicWritten(expected) | Awaiting::DescriptorWritten(expected),
                EventKind::WriteFailed { uuid, reason },
            ) if uuid == expected => {
                if uuid == CLIENT_CHARACTERISTIC_CONFIG
                    && let Some(characteristic) = &self.target.characteristic
                {
                    self.subscribed.remove(&characteristic.uuid);
                }
                self.fail(FlowError::WriteFailed { uuid, reason });
            }
            (Awaiting::TransactionBegun, EventKind::TransactionBegun)
            | (Awaiting::TransactionCommitted, EventKind::TransactionCommitted) => {
                self.advance();
            }
            (
                Awaiting::TransactionBegun | Awaiting::TransactionCommitted,
                EventKind::TransactionFailed { reason },
            ) => {
                self.fail(FlowError::TransactionFailed(reason));
            }
            (Awaiting::MtuChanged, EventKind::MtuChanged { mtu }) => {
                info!("MTU for {} is now {}", self.address, mtu);
                self.mtu = mtu;
                self.advance();
            }
            (Awaiting::MtuChanged, EventKind::MtuChangeFailed { reason }) => {
                self.fail(FlowError::MtuChangeFailed(reason));
            }
            (awaiting, kind) => {
                debug!(
                    "Flow {} awaiting {:?}, dropping {}",
                    self.address,
                    awaiting,
                    kind.name()
                );
            }
        }
    }

    fn advance(&mut self) {
        self.awaiting = None;
        self.cursor += 1;
        self.pump();
    }

    fn pump(&mut self) {
        while self.is_running() {
            let Some(step) = self.steps.get(self.cursor).cloned() else {
                self.succeed();
                return;
            };
            debug!(
                "Flow {} dispatching step {} ({})",
                self.address,
                self.cursor,
                step.name()
            );
            match self.dispatch(step) {
                Dispatch::Await(awaiting) => {
                    self.awaiting = Some(awaiting);
                    return;
                }
                Dispatch::Next => self.cursor += 1,
                Dispatch::Fail(error) => {
                    self.fail(error);
                    return;
                }
            }
        }
    }

    fn dispatch(&mut self, step: Step) -> Dispatch {
        let address = self.address.clone();
        match step {
            Step::Scan {
                filter,
                timeout_secs,
                max_devices,
            } => {
                if timeout_secs < 0 {
                    return Dispatch::Fail(FlowError::MissingConfiguration(format!(
                        "scan timeout must be non-negative, got {timeout_secs}"
                    )));
                }
                let timeout = Duration::from_secs(timeout_secs.unsigned_abs());
                submit(
                    self.transport.scan(&address, &filter, timeout, max_devices),
                    Awaiting::ScanFinished,
                    FlowError::ScanFailed,
                )
            }
            Step::PickFirstDevice => match self.last_scan.first() {
                Some(device) => {
                    let next = device.address.clone();
                    self.rebind(next);
                    Dispatch::Next
                }
                None => Dispatch::Fail(FlowError::NoDeviceFound),
            },
            Step::Connect => {
                self.services.clear();
                self.target = Target::default();
                submit(
                    self.transport.connect(&address),
                    Awaiting::Connected,
                    FlowError::ConnectFailed,
                )
            }
            Step::Disconnect => submit(
                self.transport.disconnect(&address),
                Awaiting::Disconnected,
                FlowError::DisconnectFailed,
            ),
            Step::BeginTransaction => submit(
                self.transport.begin_transaction(&address),
                Awaiting::TransactionBegun,
                FlowError::TransactionFailed,
            ),
            Step::Commit => submit(
                self.transport.commit(&address),
                Awaiting::TransactionCommitted,
                FlowError::TransactionFailed,
            ),
            Step::ChangeMtu(mtu) => {
                if mtu < DEFAULT_ATT_MTU {
                    return Dispatch::Fail(FlowError::MissingConfiguration(format!(
                        "MTU must be at least {DEFAULT_ATT_MTU}, got {mtu}"
                    )));
                }
                submit(
                    self.transport.change_mtu(&address, mtu),
                    Awaiting::MtuChanged,
                    FlowError::MtuChangeFailed,
                )
            }
            Step::LookupService(uuid) => {
                if self.services.iter().any(|s| s.uuid == uuid) {
                    self.target = Target {
                        service: Some(uuid),
                        ..Target::default()
                    };
                    Dispatch::Next
                } else {
                    Dispatch::Fail(FlowError::not_found(ObjectKind::Service, uuid))
                }
            }
            Step::LookupCharacteristic(uuid) => {
                let Some(service) = self.target.service else {
                    return Dispatch::Fail(FlowError::MissingTarget(format!(
                        "characteristic {uuid} looked up before any service"
                    )));
                };
                let found = self
                    .services
                    .iter()
                    .find(|s| s.uuid == service)
                    .and_then(|s| s.characteristic(uuid))
                    .cloned();
                match found {
                    Some(characteristic) => {
                        self.target.characteristic = Some(characteristic);
                        self.target.descriptor = None;
                        Dispatch::Next
                    }
                    None => Dispatch::Fail(FlowError::not_found(ObjectKind::Characteristic, uuid)),
                }
            }
            Step::LookupDescriptor(uuid) => {
                let Some(characteristic) = &self.target.characteristic else {
                    return Dispatch::Fail(FlowError::MissingTarget(format!(
                        "descriptor {uuid} looked up before any characteristic"
                    )));
                };
                if characteristic.has_descriptor(uuid) {
                    self.target.descriptor = Some(uuid);
                    Dispatch::Next
                } else {
                    Dispatch::Fail(FlowError::not_found(ObjectKind::Descriptor, uuid))
                }
            }
            Step::Read => {
                if let Some(target) = self.descriptor_ref() {
                    let uuid = target.descriptor;
                    submit(
                        self.transport.read_descriptor(&address, target),
                        Awaiting::DescriptorRead(uuid),
                        |reason| FlowError::ReadFailed { uuid, reason },
                    )
                } else if let Some(target) = self.characteristic_ref() {
                    let uuid = target.characteristic;
                    submit(
                        self.transport.read_characteristic(&address, target),
                        Awaiting::CharacteristicRead(uuid),
                        |reason| FlowError::ReadFailed { uuid, reason },
                    )
                } else {
                    Dispatch::Fail(FlowError::MissingTarget(
                        "read without a resolved characteristic".to_string(),
                    ))
                }
            }
            Step::Write(value) => {
                if let Some(target) = self.descriptor_ref() {
                    let uuid = target.descriptor;
                    submit(
                        self.transport.write_descriptor(&address, target, value),
                        Awaiting::DescriptorWritten(uuid),
                        |reason| FlowError::WriteFailed { uuid, reason },
                    )
                } else if let Some(target) = self.characteristic_ref() {
                    let uuid = target.characteristic;
                    submit(
                        self.transport.write_characteristic(&address, target, value),
                        Awaiting::CharacteristicWritten(uuid),
                        |reason| FlowError::WriteFailed { uuid, reason },
                    )
                } else {
                    Dispatch::Fail(FlowError::MissingTarget(
                        "write without a resolved characteristic".to_string(),
                    ))
                }
            }
            Step::WriteStream(source) => self.stream_chunk(&address, &source),
            Step::EnableNotify => self.toggle_notify(&address, true),
            Step::DisableNotify => self.toggle_notify(&address, false),
        }
    }

    fn stream_chunk(&mut self, address: &DeviceAddress, source: &StreamSource) -> Dispatch {
        let Some(target) = self.characteristic_ref() else {
            return Dispatch::Fail(FlowError::MissingTarget(
                "stream write without a resolved characteristic".to_string(),
            ));
        };

        let limit = usize::from(self.mtu.saturating_sub(ATT_WRITE_OVERHEAD)).max(1);
        match self.next_chunk(source, limit) {
            Ok(Some(chunk)) => {
                let uuid = target.characteristic;
                debug!("Streaming {} byte chunk to {}", chunk.len(), uuid);
                submit(
                    self.transport.write_characteristic(address, target, chunk),
                    Awaiting::CharacteristicWritten(uuid),
                    |reason| FlowError::WriteFailed { uuid, reason },
                )
            }
            Ok(None) => {
                debug!("Stream {} exhausted", source.label());
                Dispatch::Next
            }
            Err(e) => {
                self.stream = None;
                Dispatch::Fail(FlowError::StreamReadError(format!("{}: {e}", source.label())))
            }
        }
    }

    fn next_chunk(&mut self, source: &StreamSource, limit: usize) -> io::Result<Option<Bytes>> {
        if self.stream.is_none() {
            self.stream = Some(source.open()?);
        }
        let Some(reader) = self.stream.as_mut() else {
            return Ok(None);
        };

        let mut chunk = Vec::with_capacity(limit);
        reader.by_ref().take(limit as u64).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            self.stream = None;
            Ok(None)
        } else {
            Ok(Some(Bytes::from(chunk)))
        }
    }

    fn toggle_notify(&mut self, address: &DeviceAddress, enable: bool) -> Dispatch {
        let (Some(target), Some(characteristic)) =
            (self.characteristic_ref(), self.target.characteristic.as_ref())
        else {
            return Dispatch::Fail(FlowError::MissingTarget(
                "notification toggle without a resolved characteristic".to_string(),
            ));
        };
        let uuid = target.characteristic;
        let properties = characteristic.properties;
        let has_cccd = characteristic.has_descriptor(CLIENT_CHARACTERISTIC_CONFIG);

        if !self.transport.set_notification(address, target, enable) {
            return Dispatch::Fail(FlowError::NotifyFailed(uuid));
        }
        if !has_cccd {
            return Dispatch::Fail(FlowError::not_found(
                ObjectKind::Descriptor,
                CLIENT_CHARACTERISTIC_CONFIG,
            ));
        }
        self.target.descriptor = Some(CLIENT_CHARACTERISTIC_CONFIG);

        let value = if !enable {
            DISABLE_NOTIFICATION_VALUE
        } else if !properties.contains(CharProperties::NOTIFY)
            && properties.contains(CharProperties::INDICATE)
        {
            ENABLE_INDICATION_VALUE
        } else {
            ENABLE_NOTIFICATION_VALUE
        };
        let descriptor = target.descriptor(CLIENT_CHARACTERISTIC_CONFIG);
        let dispatch = submit(
            self.transport
                .write_descriptor(address, descriptor, Bytes::copy_from_slice(&value)),
            Awaiting::DescriptorWritten(CLIENT_CHARACTERISTIC_CONFIG),
            |reason| FlowError::WriteFailed {
                uuid: CLIENT_CHARACTERISTIC_CONFIG,
                reason,
            },
        );

        // Subscription is signalled once the CCCD write is queued.
        if let Dispatch::Await(_) = dispatch {
            if enable {
                self.subscribed.insert(uuid);
                self.listener.on_notification_subscribed(uuid);
            } else {
                self.subscribed.remove(&uuid);
                self.listener.on_notification_unsubscribed(uuid);
            }
        }
        dispatch
    }

    fn characteristic_ref(&self) -> Option<CharacteristicRef> {
        Some(CharacteristicRef {
            service: self.target.service?,
            characteristic: self.target.characteristic.as_ref()?.uuid,
        })
    }

    fn descriptor_ref(&self) -> Option<DescriptorRef> {
        let descriptor = self.target.descriptor?;
        Some(self.characteristic_ref()?.descriptor(descriptor))
    }

    fn rebind(&mut self, next: DeviceAddress) {
        if next == self.address {
            return;
        }
        info!("Flow rebinding from {} to {}", self.address, next);
        self.transport.detach(&self.address);
        self.address = next;
        self.transport.attach(&self.address, self.events.clone());
    }

    fn succeed(&mut self) {
        if !self.is_running() {
            return;
        }
        self.phase = Phase::Ended;
        self.awaiting = None;
        info!("Flow {} completed {} step(s)", self.address, self.steps.len());
        self.listener.on_success();
    }

    fn fail(&mut self, error: FlowError) {
        if !self.is_running() {
            return;
        }
        warn!(
            "Flow {} failed at step {}: {}",
            self.address, self.cursor, error
        );
        self.phase = Phase::Ended;
        self.awaiting = None;
        self.stream = None;
        self.listener.on_failure(&error);
    }
}

fn submit(
    result: Result<()>,
    awaiting: Awaiting,
    on_error: impl FnOnce(String) -> FlowError,
) -> Dispatch {
    match result {
        Ok(()) => Dispatch::Await(awaiting),
        Err(Error::TransportUnavailable(_)) => Dispatch::Fail(FlowError::TransportUnavailable),
        Err(e) => Dispatch::Fail(on_error(e.to_string())),
    }
}
