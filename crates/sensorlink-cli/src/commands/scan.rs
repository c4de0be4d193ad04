//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use sensorlink_core::BleTransportConfig;
use sensorlink_core::flow::FlowBuilder;
use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
use sensorlink_types::{DeviceAddress, ScanFilter};

use crate::cli::OutputFormat;
use crate::format::{format_scan_csv, format_scan_json, format_scan_text};
use crate::util::{open_transport, run_to_end, write_output};

/// Grace period on top of the scan itself.
const SCAN_GRACE: Duration = Duration::from_secs(10);

pub async fn cmd_scan(
    timeout: u64,
    service: Option<Uuid>,
    max: Option<usize>,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    if !quiet {
        tracing::info!("Scanning for devices (timeout: {}s)...", timeout);
    }

    let mut filter = ScanFilter::new();
    if let Some(uuid) = service {
        filter = filter.service(uuid);
    }

    let transport = open_transport(BleTransportConfig::default()).await?;
    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, DeviceAddress::unbound(), listener);
    runner.build(
        FlowBuilder::new()
            .scan(filter, i64::try_from(timeout).unwrap_or(i64::MAX), max)
            .build(),
    );

    let result = run_to_end(&runner, &mut signals, Duration::from_secs(timeout) + SCAN_GRACE).await;
    runner.close().await;

    let devices = result?
        .into_iter()
        .find_map(|signal| match signal {
            FlowSignal::ScanFinished(devices) => Some(devices),
            _ => None,
        })
        .unwrap_or_default();

    let content = match format {
        OutputFormat::Text => format_scan_text(&devices),
        OutputFormat::Json => format_scan_json(&devices)?,
        OutputFormat::Csv => format_scan_csv(&devices),
    };
    write_output(output, &content)
}
