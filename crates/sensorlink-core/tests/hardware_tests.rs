//! Hardware tests for sensorlink-core
//!
//! These tests require a BLE adapter and a nearby instrument, and should be
//! run with:
//! ```
//! cargo test --package sensorlink-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the target via environment variables:
//! - `SENSORLINK_DEVICE`: address (or macOS peripheral ID) of the instrument
//! - `SENSORLINK_SERVICE` / `SENSORLINK_CHARACTERISTIC`: UUIDs of a
//!   notifying characteristic (default: Environmental Sensing / Temperature)

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use sensorlink_core::flow::FlowBuilder;
use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
use sensorlink_core::{BleTransport, BleTransportConfig};
use sensorlink_types::uuid::from_short;
use sensorlink_types::{DeviceAddress, ScanFilter};

/// Default timeout for a whole flow.
const FLOW_TIMEOUT: Duration = Duration::from_secs(60);

fn get_device() -> Option<String> {
    env::var("SENSORLINK_DEVICE").ok().filter(|s| !s.is_empty())
}

fn uuid_from_env(key: &str, default: Uuid) -> Uuid {
    env::var(key)
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or(default)
}

async fn run_to_end(
    runner: &FlowRunner,
    signals: &mut tokio::sync::mpsc::UnboundedReceiver<FlowSignal>,
) -> Vec<FlowSignal> {
    runner.run();
    let mut seen = Vec::new();
    let result = timeout(FLOW_TIMEOUT, async {
        while let Some(signal) = signals.recv().await {
            println!("  {:?}", signal);
            let terminal = signal.is_terminal();
            seen.push(signal);
            if terminal {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "flow timed out after {:?}", FLOW_TIMEOUT);
    seen
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_discovers_devices() {
    let transport = Arc::new(BleTransport::new().await.expect("no BLE adapter"));
    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, DeviceAddress::unbound(), listener);
    runner.build(FlowBuilder::new().scan(ScanFilter::new(), 10, None).build());

    let seen = run_to_end(&runner, &mut signals).await;
    assert_eq!(seen.last(), Some(&FlowSignal::Success));
    match &seen[0] {
        FlowSignal::ScanFinished(devices) => {
            println!("Scan discovered {} devices", devices.len());
            for device in devices {
                println!(
                    "  - {} ({})",
                    device.name.as_deref().unwrap_or("Unknown"),
                    device.address
                );
            }
        }
        other => panic!("expected scan result, got {:?}", other),
    }
    runner.close().await;
}

// =============================================================================
// Device Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_discover() {
    let Some(device) = get_device() else {
        println!("SENSORLINK_DEVICE not set, skipping");
        return;
    };
    let config = BleTransportConfig::default().connect_timeout(Duration::from_secs(30));
    let transport = Arc::new(BleTransport::with_config(config).await.expect("no BLE adapter"));

    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, device.as_str(), listener);
    // The scan populates the adapter's peripheral list for the connect.
    runner.build(
        FlowBuilder::new()
            .scan(ScanFilter::new(), 10, None)
            .connect()
            .disconnect()
            .build(),
    );

    let seen = run_to_end(&runner, &mut signals).await;
    assert_eq!(seen.last(), Some(&FlowSignal::Success));
    assert!(seen
        .iter()
        .any(|s| matches!(s, FlowSignal::ServicesDiscovered(services) if !services.is_empty())));
    runner.close().await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_subscribe_receives_notifications() {
    let Some(device) = get_device() else {
        println!("SENSORLINK_DEVICE not set, skipping");
        return;
    };
    let service = uuid_from_env("SENSORLINK_SERVICE", from_short(0x181a));
    let characteristic = uuid_from_env("SENSORLINK_CHARACTERISTIC", from_short(0x2a6e));

    let transport = Arc::new(BleTransport::new().await.expect("no BLE adapter"));
    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, device.as_str(), listener);
    runner.build(
        FlowBuilder::new()
            .scan(ScanFilter::new(), 10, None)
            .connect()
            .lookup_service(service)
            .lookup_characteristic(characteristic)
            .enable_notify()
            .build(),
    );

    let seen = run_to_end(&runner, &mut signals).await;
    assert_eq!(seen.last(), Some(&FlowSignal::Success));

    let first = timeout(Duration::from_secs(30), async {
        loop {
            match signals.recv().await {
                Some(FlowSignal::Notification { value, .. }) => return Some(value),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await;
    match first {
        Ok(Some(value)) => println!("First notification: {:02X?}", value.as_ref()),
        Ok(None) => panic!("flow ended without notifications"),
        Err(_) => panic!("no notification within 30s"),
    }

    runner.build(
        FlowBuilder::new()
            .lookup_service(service)
            .lookup_characteristic(characteristic)
            .disable_notify()
            .disconnect()
            .build(),
    );
    let seen = run_to_end(&runner, &mut signals).await;
    assert_eq!(seen.last(), Some(&FlowSignal::Success));
    runner.close().await;
}
