//! Push command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use sensorlink_core::BleTransportConfig;
use sensorlink_core::flow::{FlowBuilder, StreamSource};
use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
use sensorlink_types::ScanFilter;

use crate::cli::PushArgs;
use crate::config::{Config, resolve_device, resolve_scan_timeout};
use crate::util::{open_transport, require_device, run_to_end, write_output};

/// Time allowed for the whole transfer after the scan.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn cmd_push(
    args: PushArgs,
    config: &Config,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    let device = require_device(resolve_device(args.target.device.clone(), config))?;
    let size = std::fs::metadata(&args.file)
        .with_context(|| format!("Cannot read {}", args.file.display()))?
        .len();
    let scan_timeout = resolve_scan_timeout(args.target.scan_timeout, config);

    let mut builder = FlowBuilder::new();
    if scan_timeout > 0 {
        builder = builder.scan(
            ScanFilter::new(),
            i64::try_from(scan_timeout).unwrap_or(i64::MAX),
            None,
        );
    }
    let steps = builder
        .connect()
        .change_mtu(args.mtu)
        .lookup_service(args.target.service)
        .lookup_characteristic(args.target.characteristic)
        .write_stream(StreamSource::from_path(args.file.clone()))
        .disconnect()
        .build();

    if !quiet {
        tracing::info!(
            "Writing {} ({} bytes) to {} on {}",
            args.file.display(),
            size,
            args.target.characteristic,
            device
        );
    }

    let transport = open_transport(
        BleTransportConfig::default()
            .connect_timeout(Duration::from_secs(args.target.connect_timeout)),
    )
    .await?;
    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, device.as_str(), listener);
    runner.build(steps);

    let result = run_to_end(
        &runner,
        &mut signals,
        Duration::from_secs(scan_timeout) + TRANSFER_TIMEOUT,
    )
    .await;
    runner.close().await;

    let chunks = result?
        .iter()
        .filter(|s| matches!(s, FlowSignal::CharacteristicWritten(_)))
        .count();
    write_output(
        output,
        &format!(
            "Wrote {} bytes in {} chunk(s) to {}\n",
            size, chunks, args.target.characteristic
        ),
    )
}
