//! Mock transport implementation for testing.
//!
//! This module provides a scripted transport that can be used for unit
//! testing flows without requiring actual BLE hardware.
//!
//! # Features
//!
//! - **Request log**: every submitted request is recorded for assertions
//! - **Auto-responses**: successful completion events are emitted immediately
//! - **Failure injection**: make a kind of request complete with its failure event
//! - **Manual events**: push notifications, link loss, or any raw event
//!
//! With auto-responses disabled the mock only records requests, and the test
//! drives the flow by feeding events itself.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use sensorlink_types::{
    CharProperties, CharacteristicInfo, ConnectionState, DeviceAddress, DiscoveredDevice,
    ScanFilter, ServiceInfo,
};

use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventKind, EventSender, TransportEvent};
use crate::transport::{CharacteristicRef, DescriptorRef, Transport};

/// A request as submitted to the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Scan {
        filter: ScanFilter,
        timeout: Duration,
        max_devices: Option<usize>,
    },
    Connect,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic(CharacteristicRef),
    WriteCharacteristic(CharacteristicRef, Bytes),
    ReadDescriptor(DescriptorRef),
    WriteDescriptor(DescriptorRef, Bytes),
    SetNotification(CharacteristicRef, bool),
    BeginTransaction,
    Commit,
    ChangeMtu(u16),
}

impl Request {
    /// The kind of this request, for failure injection.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Scan { .. } => RequestKind::Scan,
            Request::Connect => RequestKind::Connect,
            Request::Disconnect => RequestKind::Disconnect,
            Request::DiscoverServices => RequestKind::DiscoverServices,
            Request::ReadCharacteristic(_) => RequestKind::ReadCharacteristic,
            Request::WriteCharacteristic(..) => RequestKind::WriteCharacteristic,
            Request::ReadDescriptor(_) => RequestKind::ReadDescriptor,
            Request::WriteDescriptor(..) => RequestKind::WriteDescriptor,
            Request::SetNotification(..) => RequestKind::SetNotification,
            Request::BeginTransaction => RequestKind::BeginTransaction,
            Request::Commit => RequestKind::Commit,
            Request::ChangeMtu(_) => RequestKind::ChangeMtu,
        }
    }
}

/// Discriminant of [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Scan,
    Connect,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
    SetNotification,
    BeginTransaction,
    Commit,
    ChangeMtu,
}

/// A scripted transport for testing.
///
/// # Example
///
/// ```
/// use sensorlink_core::mock::{MockTransport, RequestKind};
/// use sensorlink_core::transport::Transport;
/// use sensorlink_core::events::{event_channel, EventKind};
/// use sensorlink_types::DeviceAddress;
///
/// let mock = MockTransport::builder().build();
/// let address = DeviceAddress::new("AA:BB:CC:DD:EE:FF");
/// let (tx, mut rx) = event_channel();
/// mock.attach(&address, tx);
///
/// mock.connect(&address).unwrap();
/// assert_eq!(rx.try_recv().unwrap().kind, EventKind::Connected);
/// assert_eq!(mock.request_count(RequestKind::Connect), 1);
/// ```
pub struct MockTransport {
    available: AtomicBool,
    auto_respond: AtomicBool,
    notify_allowed: AtomicBool,
    max_mtu: AtomicU16,
    profile: Mutex<Vec<ServiceInfo>>,
    scan_results: Mutex<Vec<DiscoveredDevice>>,
    values: Mutex<HashMap<Uuid, Bytes>>,
    failures: Mutex<HashSet<RequestKind>>,
    routes: Mutex<HashMap<DeviceAddress, EventSender>>,
    states: Mutex<HashMap<DeviceAddress, ConnectionState>>,
    requests: Mutex<Vec<(DeviceAddress, Request)>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("available", &self.available.load(Ordering::Relaxed))
            .field("auto_respond", &self.auto_respond.load(Ordering::Relaxed))
            .field("requests", &lock(&self.requests).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            auto_respond: AtomicBool::new(true),
            notify_allowed: AtomicBool::new(true),
            max_mtu: AtomicU16::new(517),
            profile: Mutex::new(Vec::new()),
            scan_results: Mutex::new(Vec::new()),
            values: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            routes: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    /// Create a mock with auto-responses enabled and an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// Generate a random mock address.
    pub fn random_address() -> DeviceAddress {
        DeviceAddress::new(format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF))
    }

    // --- Scripting ---

    /// Make the radio appear present or absent.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Enable or disable automatic completion events.
    pub fn set_auto_respond(&self, auto: bool) {
        self.auto_respond.store(auto, Ordering::Relaxed);
    }

    /// Make `set_notification` succeed or be refused.
    pub fn set_notify_allowed(&self, allowed: bool) {
        self.notify_allowed.store(allowed, Ordering::Relaxed);
    }

    /// Replace the profile reported by service discovery.
    pub fn set_profile(&self, services: Vec<ServiceInfo>) {
        *lock(&self.profile) = services;
    }

    /// Replace the devices reported by scans.
    pub fn set_scan_results(&self, devices: Vec<DiscoveredDevice>) {
        *lock(&self.scan_results) = devices;
    }

    /// Set the value returned by reads of a characteristic or descriptor.
    pub fn set_value(&self, uuid: Uuid, value: impl Into<Bytes>) {
        lock(&self.values).insert(uuid, value.into());
    }

    /// Make every request of `kind` complete with its failure event.
    pub fn fail_on(&self, kind: RequestKind) {
        lock(&self.failures).insert(kind);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Deliver a raw event to whoever is attached for its address.
    ///
    /// Returns `false` if nobody is attached.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let route = lock(&self.routes).get(&event.address).cloned();
        match route {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                debug!("Mock dropping {} for unattached {}", event.kind.name(), event.address);
                false
            }
        }
    }

    /// Deliver a notification for a characteristic.
    pub fn notify(&self, address: &DeviceAddress, uuid: Uuid, value: impl Into<Bytes>) -> bool {
        let flags = self.flags_of(uuid);
        self.emit(TransportEvent::new(
            address.clone(),
            EventKind::Notification {
                uuid,
                flags,
                value: value.into(),
            },
        ))
    }

    /// Simulate the remote side dropping the link.
    pub fn drop_link(&self, address: &DeviceAddress) -> bool {
        self.set_state(address, ConnectionState::Disconnected);
        self.emit(TransportEvent::new(
            address.clone(),
            EventKind::Disconnected {
                reason: DisconnectReason::LinkLost,
            },
        ))
    }

    // --- Inspection ---

    /// All requests submitted so far.
    pub fn requests(&self) -> Vec<(DeviceAddress, Request)> {
        lock(&self.requests).clone()
    }

    /// Number of requests of `kind` submitted so far.
    pub fn request_count(&self, kind: RequestKind) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|(_, r)| r.kind() == kind)
            .count()
    }

    /// Payloads written to `uuid` (characteristic or descriptor), in order.
    pub fn written(&self, uuid: Uuid) -> Vec<Bytes> {
        lock(&self.requests)
            .iter()
            .filter_map(|(_, r)| match r {
                Request::WriteCharacteristic(t, v) if t.characteristic == uuid => Some(v.clone()),
                Request::WriteDescriptor(t, v) if t.descriptor == uuid => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether events for `address` are currently routed somewhere.
    pub fn is_attached(&self, address: &DeviceAddress) -> bool {
        lock(&self.routes).contains_key(address)
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }

    // --- Internals ---

    fn record(&self, address: &DeviceAddress, request: Request) -> bool {
        let kind = request.kind();
        lock(&self.requests).push((address.clone(), request));
        let fails = lock(&self.failures).contains(&kind);
        if fails {
            debug!("Mock injecting failure for {:?} on {}", kind, address);
        }
        fails
    }

    fn respond(&self, address: &DeviceAddress, kind: EventKind) {
        if self.auto_respond.load(Ordering::Relaxed) {
            self.emit(TransportEvent::new(address.clone(), kind));
        }
    }

    fn set_state(&self, address: &DeviceAddress, state: ConnectionState) {
        lock(&self.states).insert(address.clone(), state);
    }

    fn flags_of(&self, uuid: Uuid) -> CharProperties {
        lock(&self.profile)
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == uuid)
            .map(|c| c.properties)
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::TransportUnavailable("mock radio disabled".to_string()))
        }
    }
}

impl Transport for MockTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn attach(&self, address: &DeviceAddress, events: EventSender) {
        lock(&self.routes).insert(address.clone(), events);
    }

    fn detach(&self, address: &DeviceAddress) {
        lock(&self.routes).remove(address);
    }

    fn connection_state(&self, address: &DeviceAddress) -> ConnectionState {
        lock(&self.states).get(address).copied().unwrap_or_default()
    }

    fn scan(
        &self,
        address: &DeviceAddress,
        filter: &ScanFilter,
        timeout: Duration,
        max_devices: Option<usize>,
    ) -> Result<()> {
        self.check_available()?;
        let fails = self.record(
            address,
            Request::Scan {
                filter: filter.clone(),
                timeout,
                max_devices,
            },
        );
        if fails {
            self.respond(
                address,
                EventKind::ScanFailed {
                    reason: "mock scan failure".to_string(),
                },
            );
            return Ok(());
        }
        let devices = lock(&self.scan_results)
            .iter()
            .filter(|d| filter.matches(d.name.as_deref(), &d.services))
            .take(max_devices.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        self.respond(address, EventKind::ScanFinished { devices });
        Ok(())
    }

    fn connect(&self, address: &DeviceAddress) -> Result<()> {
        self.check_available()?;
        if self.record(address, Request::Connect) {
            self.set_state(address, ConnectionState::Disconnected);
            self.respond(
                address,
                EventKind::ConnectFailed {
                    reason: "mock connect failure".to_string(),
                },
            );
        } else {
            self.set_state(address, ConnectionState::Connected);
            self.respond(address, EventKind::Connected);
        }
        Ok(())
    }

    fn disconnect(&self, address: &DeviceAddress) -> Result<()> {
        if self.record(address, Request::Disconnect) {
            self.respond(
                address,
                EventKind::DisconnectFailed {
                    reason: "mock disconnect failure".to_string(),
                },
            );
            return Ok(());
        }
        let reason = if self.connection_state(address).is_connected() {
            DisconnectReason::Requested
        } else {
            DisconnectReason::AlreadyDisconnected
        };
        self.set_state(address, ConnectionState::Disconnected);
        self.respond(address, EventKind::Disconnected { reason });
        Ok(())
    }

    fn discover_services(&self, address: &DeviceAddress) -> Result<()> {
        let fails = self.record(address, Request::DiscoverServices);
        self.set_state(address, ConnectionState::Discovering);
        if !self.auto_respond.load(Ordering::Relaxed) {
            return Ok(());
        }
        if fails {
            self.set_state(address, ConnectionState::Connected);
            self.respond(
                address,
                EventKind::DiscoveryFailed {
                    reason: "mock discovery failure".to_string(),
                },
            );
        } else {
            self.set_state(address, ConnectionState::Ready);
            let services = lock(&self.profile).clone();
            self.respond(address, EventKind::ServicesDiscovered { services });
        }
        Ok(())
    }

    fn read_characteristic(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
    ) -> Result<()> {
        let uuid = target.characteristic;
        if self.record(address, Request::ReadCharacteristic(target)) {
            self.respond(
                address,
                EventKind::ReadFailed {
                    uuid,
                    reason: "mock read failure".to_string(),
                },
            );
        } else {
            let value = lock(&self.values).get(&uuid).cloned().unwrap_or_default();
            let flags = self.flags_of(uuid);
            self.respond(address, EventKind::CharacteristicRead { uuid, flags, value });
        }
        Ok(())
    }

    fn write_characteristic(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        value: Bytes,
    ) -> Result<()> {
        let uuid = target.characteristic;
        if self.record(address, Request::WriteCharacteristic(target, value)) {
            self.respond(
                address,
                EventKind::WriteFailed {
                    uuid,
                    reason: "mock write failure".to_string(),
                },
            );
        } else {
            self.respond(address, EventKind::CharacteristicWritten { uuid });
        }
        Ok(())
    }

    fn read_descriptor(&self, address: &DeviceAddress, target: DescriptorRef) -> Result<()> {
        let uuid = target.descriptor;
        if self.record(address, Request::ReadDescriptor(target)) {
            self.respond(
                address,
                EventKind::ReadFailed {
                    uuid,
                    reason: "mock read failure".to_string(),
                },
            );
        } else {
            let value = lock(&self.values).get(&uuid).cloned().unwrap_or_default();
            self.respond(address, EventKind::DescriptorRead { uuid, value });
        }
        Ok(())
    }

    fn write_descriptor(
        &self,
        address: &DeviceAddress,
        target: DescriptorRef,
        value: Bytes,
    ) -> Result<()> {
        let uuid = target.descriptor;
        if self.record(address, Request::WriteDescriptor(target, value)) {
            self.respond(
                address,
                EventKind::WriteFailed {
                    uuid,
                    reason: "mock write failure".to_string(),
                },
            );
        } else {
            self.respond(address, EventKind::DescriptorWritten { uuid });
        }
        Ok(())
    }

    fn set_notification(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        enable: bool,
    ) -> bool {
        let fails = self.record(address, Request::SetNotification(target, enable));
        !fails && self.notify_allowed.load(Ordering::Relaxed)
    }

    fn begin_transaction(&self, address: &DeviceAddress) -> Result<()> {
        if self.record(address, Request::BeginTransaction) {
            self.respond(
                address,
                EventKind::TransactionFailed {
                    reason: "mock begin failure".to_string(),
                },
            );
        } else {
            self.respond(address, EventKind::TransactionBegun);
        }
        Ok(())
    }

    fn commit(&self, address: &DeviceAddress) -> Result<()> {
        if self.record(address, Request::Commit) {
            self.respond(
                address,
                EventKind::TransactionFailed {
                    reason: "mock commit failure".to_string(),
                },
            );
        } else {
            self.respond(address, EventKind::TransactionCommitted);
        }
        Ok(())
    }

    fn change_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<()> {
        if self.record(address, Request::ChangeMtu(mtu)) {
            self.respond(
                address,
                EventKind::MtuChangeFailed {
                    reason: "mock MTU failure".to_string(),
                },
            );
        } else {
            let granted = mtu.min(self.max_mtu.load(Ordering::Relaxed));
            self.respond(address, EventKind::MtuChanged { mtu: granted });
        }
        Ok(())
    }
}

/// Builder for creating mock transports with custom settings.
#[derive(Debug, Default)]
pub struct MockTransportBuilder {
    services: Vec<ServiceInfo>,
    scan_results: Vec<DiscoveredDevice>,
    values: Vec<(Uuid, Bytes)>,
    unavailable: bool,
    manual: bool,
    max_mtu: Option<u16>,
}

impl MockTransportBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service to the discovered profile.
    #[must_use]
    pub fn service(mut self, service: ServiceInfo) -> Self {
        self.services.push(service);
        self
    }

    /// Add a service with notifiable characteristics (each carrying a CCCD).
    #[must_use]
    pub fn notifying_service(mut self, service: Uuid, characteristics: &[Uuid]) -> Self {
        self.services.push(ServiceInfo {
            uuid: service,
            characteristics: characteristics
                .iter()
                .map(|&uuid| CharacteristicInfo {
                    uuid,
                    properties: CharProperties(
                        CharProperties::READ | CharProperties::WRITE | CharProperties::NOTIFY,
                    ),
                    descriptors: vec![sensorlink_types::uuid::CLIENT_CHARACTERISTIC_CONFIG],
                })
                .collect(),
        });
        self
    }

    /// Add a device to the scan results.
    #[must_use]
    pub fn scan_result(mut self, device: DiscoveredDevice) -> Self {
        self.scan_results.push(device);
        self
    }

    /// Set the value returned by reads of `uuid`.
    #[must_use]
    pub fn value(mut self, uuid: Uuid, value: impl Into<Bytes>) -> Self {
        self.values.push((uuid, value.into()));
        self
    }

    /// Start with the radio disabled.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Start with auto-responses disabled.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Cap MTU grants.
    #[must_use]
    pub fn max_mtu(mut self, mtu: u16) -> Self {
        self.max_mtu = Some(mtu);
        self
    }

    /// Build the mock transport.
    pub fn build(self) -> MockTransport {
        let mock = MockTransport::new();
        mock.set_profile(self.services);
        mock.set_scan_results(self.scan_results);
        for (uuid, value) in self.values {
            mock.set_value(uuid, value);
        }
        mock.set_available(!self.unavailable);
        mock.set_auto_respond(!self.manual);
        if let Some(mtu) = self.max_mtu {
            mock.max_mtu.store(mtu, Ordering::Relaxed);
        }
        mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn addr() -> DeviceAddress {
        DeviceAddress::new("AA:BB:CC:DD:EE:FF")
    }

    #[test]
    fn test_mock_connect_and_disconnect() {
        let mock = MockTransport::new();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);

        mock.connect(&addr()).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Connected);
        assert_eq!(mock.connection_state(&addr()), ConnectionState::Connected);

        mock.disconnect(&addr()).unwrap();
        assert_eq!(
            rx.try_recv().unwrap().kind,
            EventKind::Disconnected {
                reason: DisconnectReason::Requested
            }
        );
    }

    #[test]
    fn test_mock_disconnect_is_idempotent() {
        let mock = MockTransport::new();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);

        mock.disconnect(&addr()).unwrap();
        mock.disconnect(&addr()).unwrap();
        for _ in 0..2 {
            assert_eq!(
                rx.try_recv().unwrap().kind,
                EventKind::Disconnected {
                    reason: DisconnectReason::AlreadyDisconnected
                }
            );
        }
    }

    #[test]
    fn test_mock_failure_injection() {
        let mock = MockTransport::new();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);
        mock.fail_on(RequestKind::Connect);

        mock.connect(&addr()).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            EventKind::ConnectFailed { .. }
        ));

        mock.clear_failures();
        mock.connect(&addr()).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Connected);
    }

    #[test]
    fn test_mock_manual_mode_records_only() {
        let mock = MockTransport::builder().manual().build();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);

        mock.connect(&addr()).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(mock.requests(), vec![(addr(), Request::Connect)]);
    }

    #[test]
    fn test_mock_unavailable_rejects_requests() {
        let mock = MockTransport::builder().unavailable().build();
        assert!(!mock.is_available());
        assert!(matches!(
            mock.connect(&addr()),
            Err(Error::TransportUnavailable(_))
        ));
        assert_eq!(mock.request_count(RequestKind::Connect), 0);
    }

    #[test]
    fn test_mock_discovery_passes_through_discovering() {
        let manual = MockTransport::builder().manual().build();
        manual.connect(&addr()).unwrap();
        manual.discover_services(&addr()).unwrap();
        assert_eq!(manual.connection_state(&addr()), ConnectionState::Discovering);

        let mock = MockTransport::new();
        mock.connect(&addr()).unwrap();
        mock.discover_services(&addr()).unwrap();
        assert_eq!(mock.connection_state(&addr()), ConnectionState::Ready);

        let failing = MockTransport::new();
        failing.fail_on(RequestKind::DiscoverServices);
        failing.connect(&addr()).unwrap();
        failing.discover_services(&addr()).unwrap();
        assert_eq!(failing.connection_state(&addr()), ConnectionState::Connected);
    }

    #[test]
    fn test_mock_scan_failure_emits_scan_failed() {
        let mock = MockTransport::new();
        mock.fail_on(RequestKind::Scan);
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);

        mock.scan(&addr(), &ScanFilter::new(), Duration::from_secs(1), None)
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            EventKind::ScanFailed { .. }
        ));
    }

    #[test]
    fn test_mock_scan_filters_and_limits() {
        let svc = Uuid::from_u128(0x10);
        let device = |name: &str, services: Vec<Uuid>| DiscoveredDevice {
            address: MockTransport::random_address(),
            name: Some(name.to_string()),
            rssi: Some(-60),
            services,
        };
        let mock = MockTransport::builder()
            .scan_result(device("A", vec![svc]))
            .scan_result(device("B", vec![]))
            .scan_result(device("C", vec![svc]))
            .build();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);

        mock.scan(
            &addr(),
            &ScanFilter::new().service(svc),
            Duration::from_secs(1),
            Some(1),
        )
        .unwrap();
        match rx.try_recv().unwrap().kind {
            EventKind::ScanFinished { devices } => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].name.as_deref(), Some("A"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_mock_notify_and_unattached() {
        let mock = MockTransport::new();
        let ch = Uuid::from_u128(0x20);
        assert!(!mock.notify(&addr(), ch, vec![1u8]));

        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);
        assert!(mock.notify(&addr(), ch, vec![1u8, 2]));
        match rx.try_recv().unwrap().kind {
            EventKind::Notification { uuid, value, .. } => {
                assert_eq!(uuid, ch);
                assert_eq!(&value[..], &[1, 2]);
            }
            other => panic!("unexpected event {other:?}"),
        }

        mock.detach(&addr());
        assert!(!mock.is_attached(&addr()));
    }

    #[test]
    fn test_mock_mtu_cap() {
        let mock = MockTransport::builder().max_mtu(185).build();
        let (tx, mut rx) = event_channel();
        mock.attach(&addr(), tx);
        mock.change_mtu(&addr(), 247).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::MtuChanged { mtu: 185 });
    }

    #[test]
    fn test_mock_debug() {
        let mock = MockTransport::new();
        let debug_str = format!("{:?}", mock);
        assert!(debug_str.contains("MockTransport"));
    }
}
