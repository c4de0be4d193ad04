//! [`Transport`] implementation on top of btleplug.
//!
//! btleplug is async while [`Transport`] only submits, so every request is
//! spawned onto the tokio runtime the transport was created on, and its
//! outcome is routed back as a [`TransportEvent`]. Two long-lived tasks run
//! alongside: one watches the adapter for unexpected disconnects, and one per
//! connected device forwards notifications.
//!
//! Gaps in what btleplug exposes:
//!
//! - Reliable-write transactions are not available. `begin_transaction` and
//!   `commit` complete immediately and writes go out one by one.
//! - MTU negotiation is not exposed. `change_mtu` reports the default ATT MTU.
//! - The CCCD is owned by the host stack. Writing it is translated into
//!   `subscribe` / `unsubscribe`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter as BleFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorlink_types::uuid::{
    CLIENT_CHARACTERISTIC_CONFIG, DEFAULT_ATT_MTU, DISABLE_NOTIFICATION_VALUE,
};
use sensorlink_types::{
    CharProperties, CharacteristicInfo, ConnectionState, DeviceAddress, DiscoveredDevice,
    ScanFilter, ServiceInfo,
};

use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventKind, EventSender, TransportEvent};
use crate::transport::{CharacteristicRef, DescriptorRef, Transport};

/// Default timeout for establishing a link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single read or write.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeouts applied to btleplug calls.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sensorlink_core::ble::BleTransportConfig;
///
/// let config = BleTransportConfig::default()
///     .connect_timeout(Duration::from_secs(20))
///     .io_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleTransportConfig {
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Validate the configuration. All timeouts must be non-zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("io_timeout", self.io_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the transport handle and its tasks.
#[derive(Default)]
struct Shared {
    available: AtomicBool,
    routes: Mutex<HashMap<DeviceAddress, EventSender>>,
    states: Mutex<HashMap<DeviceAddress, ConnectionState>>,
    peripherals: Mutex<HashMap<DeviceAddress, Peripheral>>,
    ids: Mutex<HashMap<PeripheralId, DeviceAddress>>,
    pumps: Mutex<HashMap<DeviceAddress, JoinHandle<()>>>,
}

impl Shared {
    fn emit(&self, address: &DeviceAddress, kind: EventKind) {
        let routes = lock(&self.routes);
        match routes.get(address) {
            Some(tx) => {
                if tx.send(TransportEvent::new(address.clone(), kind)).is_err() {
                    debug!("Event receiver for {} dropped", address);
                }
            }
            None => debug!("No route for {}, dropping {}", address, kind.name()),
        }
    }

    fn state(&self, address: &DeviceAddress) -> ConnectionState {
        lock(&self.states)
            .get(address)
            .copied()
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn set_state(&self, address: &DeviceAddress, state: ConnectionState) {
        lock(&self.states).insert(address.clone(), state);
    }

    /// Move `address` to `to` only if it is still in `from`.
    fn transition(&self, address: &DeviceAddress, from: ConnectionState, to: ConnectionState) {
        let mut states = lock(&self.states);
        if states.get(address) == Some(&from) {
            states.insert(address.clone(), to);
        }
    }

    /// Drop the cached peripheral and state of an address without a live link.
    fn forget(&self, address: &DeviceAddress) {
        if self.state(address).is_connected() {
            return;
        }
        lock(&self.states).remove(address);
        if let Some(peripheral) = lock(&self.peripherals).remove(address) {
            lock(&self.ids).remove(&peripheral.id());
        }
    }

    /// Forget every address that is neither routed nor connected.
    fn prune(&self) {
        let routed: HashSet<DeviceAddress> = lock(&self.routes).keys().cloned().collect();
        let connected: HashSet<DeviceAddress> = lock(&self.states)
            .iter()
            .filter(|(_, state)| state.is_connected())
            .map(|(address, _)| address.clone())
            .collect();
        let keep = |address: &DeviceAddress| routed.contains(address) || connected.contains(address);

        lock(&self.states).retain(|address, _| keep(address));
        lock(&self.peripherals).retain(|address, _| keep(address));
        lock(&self.ids).retain(|_, address| keep(address));
    }

    fn stop_pump(&self, address: &DeviceAddress) {
        if let Some(handle) = lock(&self.pumps).remove(address) {
            handle.abort();
        }
    }

    /// Find the peripheral behind `address`, asking the adapter if it is not cached.
    async fn resolve(&self, adapter: &Adapter, address: &DeviceAddress) -> Result<Peripheral> {
        let cached = lock(&self.peripherals).get(address).cloned();
        if let Some(peripheral) = cached {
            return Ok(peripheral);
        }

        for peripheral in adapter.peripherals().await? {
            let properties = peripheral.properties().await?;
            let candidate = match &properties {
                Some(p) => create_identifier(&p.address.to_string(), &peripheral.id()),
                None => format_peripheral_id(&peripheral.id()),
            };
            if DeviceAddress::new(candidate) == *address {
                self.remember(address, &peripheral);
                return Ok(peripheral);
            }
        }
        Err(Error::DeviceNotFound(address.to_string()))
    }

    fn remember(&self, address: &DeviceAddress, peripheral: &Peripheral) {
        lock(&self.peripherals).insert(address.clone(), peripheral.clone());
        lock(&self.ids).insert(peripheral.id(), address.clone());
    }
}

/// Format a peripheral ID as a string.
///
/// On macOS peripheral IDs are UUIDs; elsewhere they wrap the MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// The identifier a device is addressed by.
///
/// macOS reports `00:00:00:00:00:00` for every device, so the peripheral ID
/// is used there instead.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_placeholder_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_placeholder_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

fn find_characteristic(peripheral: &Peripheral, target: CharacteristicRef) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == target.service && c.uuid == target.characteristic)
}

fn flags_of(characteristic: &Characteristic) -> CharProperties {
    CharProperties(characteristic.properties.bits())
}

fn service_infos(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    peripheral
        .services()
        .into_iter()
        .map(|service| ServiceInfo {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .iter()
                .map(|c| CharacteristicInfo {
                    uuid: c.uuid,
                    properties: flags_of(c),
                    descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect()
}

async fn with_timeout<T, F>(duration: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = btleplug::Result<T>>,
{
    timeout(duration, fut)
        .await
        .map_err(|_| Error::timeout(operation, duration))?
        .map_err(Error::from)
}

/// BLE transport backed by the first adapter btleplug reports.
///
/// Must be created from within a tokio runtime; requests are executed on
/// that runtime.
pub struct BleTransport {
    adapter: Adapter,
    config: BleTransportConfig,
    runtime: Handle,
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("config", &self.config)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Open the first adapter with default timeouts.
    pub async fn new() -> Result<Self> {
        Self::with_config(BleTransportConfig::default()).await
    }

    /// Open the first adapter.
    #[tracing::instrument(level = "info", skip_all, fields(connect_timeout = ?config.connect_timeout))]
    pub async fn with_config(config: BleTransportConfig) -> Result<Self> {
        config.validate()?;
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TransportUnavailable("no Bluetooth adapter".to_string()))?;
        info!("Using adapter {}", adapter.adapter_info().await?);
        Self::from_adapter(adapter, config).await
    }

    /// Wrap an already-opened adapter.
    pub async fn from_adapter(adapter: Adapter, config: BleTransportConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::default());
        shared.available.store(true, Ordering::SeqCst);

        let cancel_token = CancellationToken::new();
        let mut events = adapter.events().await?;
        let watch_shared = shared.clone();
        let watch_token = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch_token.cancelled() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) => {
                            on_device_disconnected(&watch_shared, &id);
                        }
                        Some(_) => {}
                        None => {
                            warn!("Adapter event stream ended");
                            watch_shared.available.store(false, Ordering::SeqCst);
                            break;
                        }
                    },
                }
            }
            debug!("Adapter watcher stopped");
        });

        Ok(Self {
            adapter,
            config,
            runtime: Handle::current(),
            shared,
            cancel_token,
        })
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::TransportUnavailable("adapter is gone".to_string()))
        }
    }

    /// Run `task` in the background and route the event it produces.
    fn submit<F>(&self, address: &DeviceAddress, task: F) -> Result<()>
    where
        F: Future<Output = EventKind> + Send + 'static,
    {
        self.check_available()?;
        let shared = self.shared.clone();
        let address = address.clone();
        self.runtime.spawn(async move {
            let kind = task.await;
            shared.emit(&address, kind);
        });
        Ok(())
    }

    /// Submit an event that needs no radio work.
    fn complete(&self, address: &DeviceAddress, kind: EventKind) -> Result<()> {
        self.submit(address, async move { kind })
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        for (_, handle) in lock(&self.shared.pumps).drain() {
            handle.abort();
        }
    }
}

fn on_device_disconnected(shared: &Shared, id: &PeripheralId) {
    let Some(address) = lock(&shared.ids).get(id).cloned() else {
        return;
    };
    // A requested disconnect has already moved the state.
    if shared.state(&address) == ConnectionState::Disconnected {
        return;
    }
    warn!("Link to {} lost", address);
    shared.set_state(&address, ConnectionState::Disconnected);
    shared.stop_pump(&address);
    shared.emit(
        &address,
        EventKind::Disconnected {
            reason: DisconnectReason::LinkLost,
        },
    );
}

/// Forward notifications of `peripheral` until the stream ends.
async fn spawn_notification_pump(
    shared: Arc<Shared>,
    address: DeviceAddress,
    peripheral: Peripheral,
) -> Result<()> {
    let mut stream = peripheral.notifications().await?;
    let pump_shared = shared.clone();
    let pump_address = address.clone();
    let handle = tokio::spawn(async move {
        while let Some(notification) = stream.next().await {
            let flags = peripheral
                .characteristics()
                .iter()
                .find(|c| c.uuid == notification.uuid)
                .map(flags_of)
                .unwrap_or_default();
            pump_shared.emit(
                &pump_address,
                EventKind::Notification {
                    uuid: notification.uuid,
                    flags,
                    value: Bytes::from(notification.value),
                },
            );
        }
        debug!("Notification stream for {} ended", pump_address);
    });
    if let Some(previous) = lock(&shared.pumps).insert(address, handle) {
        previous.abort();
    }
    Ok(())
}

impl Transport for BleTransport {
    fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    fn attach(&self, address: &DeviceAddress, events: EventSender) {
        lock(&self.shared.routes).insert(address.clone(), events);
    }

    fn detach(&self, address: &DeviceAddress) {
        lock(&self.shared.routes).remove(address);
        self.shared.forget(address);
    }

    fn connection_state(&self, address: &DeviceAddress) -> ConnectionState {
        self.shared.state(address)
    }

    fn scan(
        &self,
        address: &DeviceAddress,
        filter: &ScanFilter,
        duration: Duration,
        max_devices: Option<usize>,
    ) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let filter = filter.clone();
        self.shared.prune();
        self.submit(address, async move {
            info!("Starting BLE scan for {:?}", duration);
            let ble_filter = BleFilter {
                services: filter.services.clone(),
            };
            if let Err(e) = adapter.start_scan(ble_filter).await {
                warn!("Could not start scan: {}", e);
                return EventKind::ScanFailed {
                    reason: e.to_string(),
                };
            }

            let deadline = tokio::time::Instant::now() + duration;
            let mut devices = loop {
                let found = collect_devices(&shared, &adapter, &filter).await;
                if max_devices.is_some_and(|max| found.len() >= max)
                    || tokio::time::Instant::now() >= deadline
                {
                    break found;
                }
                sleep(SCAN_POLL_INTERVAL).await;
            };

            if let Err(e) = adapter.stop_scan().await {
                warn!("Could not stop scan: {}", e);
            }
            if let Some(max) = max_devices {
                devices.truncate(max);
            }
            info!("Scan complete. Found {} device(s)", devices.len());
            EventKind::ScanFinished { devices }
        })
    }

    fn connect(&self, address: &DeviceAddress) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let connect_timeout = self.config.connect_timeout;
        let target = address.clone();
        self.check_available()?;
        self.shared.set_state(address, ConnectionState::Connecting);
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &target).await?;
                with_timeout(connect_timeout, "connect to device", peripheral.connect()).await?;
                spawn_notification_pump(shared.clone(), target.clone(), peripheral).await
            }
            .await;

            match result {
                Ok(()) => {
                    info!("Connected to {}", target);
                    shared.set_state(&target, ConnectionState::Connected);
                    EventKind::Connected
                }
                Err(e) => {
                    warn!("Connecting to {} failed: {}", target, e);
                    shared.set_state(&target, ConnectionState::Disconnected);
                    EventKind::ConnectFailed {
                        reason: e.to_string(),
                    }
                }
            }
        })
    }

    fn disconnect(&self, address: &DeviceAddress) -> Result<()> {
        let previous = self.shared.state(address);
        self.shared.set_state(address, ConnectionState::Disconnected);
        self.shared.stop_pump(address);
        if previous == ConnectionState::Disconnected {
            return self.complete(
                address,
                EventKind::Disconnected {
                    reason: DisconnectReason::AlreadyDisconnected,
                },
            );
        }

        let peripheral = lock(&self.shared.peripherals).get(address).cloned();
        let io_timeout = self.config.io_timeout;
        self.submit(address, async move {
            let Some(peripheral) = peripheral else {
                return EventKind::Disconnected {
                    reason: DisconnectReason::AlreadyDisconnected,
                };
            };
            match with_timeout(io_timeout, "disconnect", peripheral.disconnect()).await {
                Ok(()) => EventKind::Disconnected {
                    reason: DisconnectReason::Requested,
                },
                Err(e) => EventKind::DisconnectFailed {
                    reason: e.to_string(),
                },
            }
        })
    }

    fn discover_services(&self, address: &DeviceAddress) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let discovery_timeout = self.config.discovery_timeout;
        let target = address.clone();
        self.check_available()?;
        self.shared.set_state(address, ConnectionState::Discovering);
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &target).await?;
                with_timeout(
                    discovery_timeout,
                    "discover services",
                    peripheral.discover_services(),
                )
                .await?;
                Ok::<_, Error>(service_infos(&peripheral))
            }
            .await;

            match result {
                Ok(services) => {
                    debug!("Found {} services on {}", services.len(), target);
                    shared.transition(&target, ConnectionState::Discovering, ConnectionState::Ready);
                    EventKind::ServicesDiscovered { services }
                }
                Err(e) => {
                    shared.transition(
                        &target,
                        ConnectionState::Discovering,
                        ConnectionState::Connected,
                    );
                    EventKind::DiscoveryFailed {
                        reason: e.to_string(),
                    }
                }
            }
        })
    }

    fn read_characteristic(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
    ) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let io_timeout = self.config.io_timeout;
        let device = address.clone();
        let uuid = target.characteristic;
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &device).await?;
                let characteristic = find_characteristic(&peripheral, target)
                    .ok_or_else(|| Error::DeviceNotFound(format!("characteristic {uuid}")))?;
                let value = with_timeout(
                    io_timeout,
                    &format!("read characteristic {uuid}"),
                    peripheral.read(&characteristic),
                )
                .await?;
                Ok::<_, Error>((flags_of(&characteristic), value))
            }
            .await;

            match result {
                Ok((flags, value)) => EventKind::CharacteristicRead {
                    uuid,
                    flags,
                    value: Bytes::from(value),
                },
                Err(e) => EventKind::ReadFailed {
                    uuid,
                    reason: e.to_string(),
                },
            }
        })
    }

    fn write_characteristic(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        value: Bytes,
    ) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let io_timeout = self.config.io_timeout;
        let device = address.clone();
        let uuid = target.characteristic;
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &device).await?;
                let characteristic = find_characteristic(&peripheral, target)
                    .ok_or_else(|| Error::DeviceNotFound(format!("characteristic {uuid}")))?;
                let write_type = if flags_of(&characteristic).contains(CharProperties::WRITE) {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                with_timeout(
                    io_timeout,
                    &format!("write characteristic {uuid}"),
                    peripheral.write(&characteristic, &value, write_type),
                )
                .await
            }
            .await;

            match result {
                Ok(()) => EventKind::CharacteristicWritten { uuid },
                Err(e) => EventKind::WriteFailed {
                    uuid,
                    reason: e.to_string(),
                },
            }
        })
    }

    fn read_descriptor(&self, address: &DeviceAddress, target: DescriptorRef) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let io_timeout = self.config.io_timeout;
        let device = address.clone();
        let uuid = target.descriptor;
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &device).await?;
                let descriptor = find_characteristic(
                    &peripheral,
                    CharacteristicRef {
                        service: target.service,
                        characteristic: target.characteristic,
                    },
                )
                .and_then(|c| c.descriptors.into_iter().find(|d| d.uuid == uuid))
                .ok_or_else(|| Error::DeviceNotFound(format!("descriptor {uuid}")))?;
                with_timeout(
                    io_timeout,
                    &format!("read descriptor {uuid}"),
                    peripheral.read_descriptor(&descriptor),
                )
                .await
            }
            .await;

            match result {
                Ok(value) => EventKind::DescriptorRead {
                    uuid,
                    value: Bytes::from(value),
                },
                Err(e) => EventKind::ReadFailed {
                    uuid,
                    reason: e.to_string(),
                },
            }
        })
    }

    fn write_descriptor(
        &self,
        address: &DeviceAddress,
        target: DescriptorRef,
        value: Bytes,
    ) -> Result<()> {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let io_timeout = self.config.io_timeout;
        let device = address.clone();
        let uuid = target.descriptor;
        self.submit(address, async move {
            let result = async {
                let peripheral = shared.resolve(&adapter, &device).await?;
                let characteristic = find_characteristic(
                    &peripheral,
                    CharacteristicRef {
                        service: target.service,
                        characteristic: target.characteristic,
                    },
                )
                .ok_or_else(|| {
                    Error::DeviceNotFound(format!("characteristic {}", target.characteristic))
                })?;

                if uuid == CLIENT_CHARACTERISTIC_CONFIG {
                    let operation = format!("configure notifications of {}", characteristic.uuid);
                    return if value.as_ref() == DISABLE_NOTIFICATION_VALUE {
                        with_timeout(io_timeout, &operation, peripheral.unsubscribe(&characteristic))
                            .await
                    } else {
                        with_timeout(io_timeout, &operation, peripheral.subscribe(&characteristic))
                            .await
                    };
                }

                let descriptor = characteristic
                    .descriptors
                    .into_iter()
                    .find(|d| d.uuid == uuid)
                    .ok_or_else(|| Error::DeviceNotFound(format!("descriptor {uuid}")))?;
                with_timeout(
                    io_timeout,
                    &format!("write descriptor {uuid}"),
                    peripheral.write_descriptor(&descriptor, &value),
                )
                .await
            }
            .await;

            match result {
                Ok(()) => EventKind::DescriptorWritten { uuid },
                Err(e) => EventKind::WriteFailed {
                    uuid,
                    reason: e.to_string(),
                },
            }
        })
    }

    fn set_notification(
        &self,
        address: &DeviceAddress,
        target: CharacteristicRef,
        enable: bool,
    ) -> bool {
        // Local delivery is always on; the CCCD write does the real work.
        debug!(
            "Notifications for {} on {}: {}",
            target.characteristic, address, enable
        );
        self.is_available()
    }

    fn begin_transaction(&self, address: &DeviceAddress) -> Result<()> {
        self.complete(address, EventKind::TransactionBegun)
    }

    fn commit(&self, address: &DeviceAddress) -> Result<()> {
        self.complete(address, EventKind::TransactionCommitted)
    }

    fn change_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<()> {
        debug!(
            "MTU {} requested for {}, btleplug negotiates on its own",
            mtu, address
        );
        self.complete(
            address,
            EventKind::MtuChanged {
                mtu: DEFAULT_ATT_MTU,
            },
        )
    }
}

/// Discovered peripherals matching `filter`, remembered for later resolution.
async fn collect_devices(
    shared: &Shared,
    adapter: &Adapter,
    filter: &ScanFilter,
) -> Vec<DiscoveredDevice> {
    let peripherals = match adapter.peripherals().await {
        Ok(p) => p,
        Err(e) => {
            debug!("Listing peripherals failed: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for peripheral in peripherals {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                debug!("Error processing peripheral: {}", e);
                continue;
            }
        };
        if !filter.matches(properties.local_name.as_deref(), &properties.services) {
            continue;
        }

        let address = DeviceAddress::new(create_identifier(
            &properties.address.to_string(),
            &peripheral.id(),
        ));
        shared.remember(&address, &peripheral);
        devices.push(DiscoveredDevice {
            address,
            name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        });
    }
    devices
}
