//! Record command implementation.
//!
//! Subscribes to one characteristic, decodes every notification and records
//! it into the database until the duration elapses, Ctrl-C is pressed or
//! the link drops. The subscription is torn down and the run statistics
//! written on the way out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sensorlink_core::BleTransportConfig;
use sensorlink_core::flow::{FlowBuilder, Step};
use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
use sensorlink_core::session::RecordingSession;
use sensorlink_core::zoom::RecorderConfig;
use sensorlink_store::{Store, StoreSink};
use sensorlink_types::{CharProperties, PayloadFormat, ScanFilter};

use crate::cli::RecordArgs;
use crate::config::{Config, resolve_device, resolve_filter, resolve_scan_timeout};
use crate::format::format_stats_text;
use crate::util::{
    default_run_id, now_millis, open_transport, require_device, run_to_end, write_output,
};

/// Time allowed for the teardown flow.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Steps that bring the device up to a live subscription.
pub(crate) fn subscribe_steps(scan_timeout: u64, service: Uuid, characteristic: Uuid) -> Vec<Step> {
    let mut builder = FlowBuilder::new();
    if scan_timeout > 0 {
        builder = builder.scan(
            ScanFilter::new(),
            i64::try_from(scan_timeout).unwrap_or(i64::MAX),
            None,
        );
    }
    builder
        .connect()
        .lookup_service(service)
        .lookup_characteristic(characteristic)
        .enable_notify()
        .build()
}

/// Steps that undo [`subscribe_steps`].
pub(crate) fn teardown_steps(service: Uuid, characteristic: Uuid) -> Vec<Step> {
    FlowBuilder::new()
        .lookup_service(service)
        .lookup_characteristic(characteristic)
        .disable_notify()
        .disconnect()
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Elapsed,
    Interrupted,
    LinkLost,
}

struct Recorder {
    session: RecordingSession<StoreSink>,
    characteristic: Uuid,
    format: PayloadFormat,
}

impl Recorder {
    /// Record a notification. Returns `true` if the link went down.
    fn handle(&mut self, signal: FlowSignal) -> bool {
        match signal {
            FlowSignal::Notification { uuid, flags, value } if uuid == self.characteristic => {
                self.record(&value, flags);
                false
            }
            FlowSignal::Disconnected => true,
            FlowSignal::Failure(e) => {
                warn!("Flow failed while recording: {}", e);
                true
            }
            _ => false,
        }
    }

    fn record(&mut self, payload: &[u8], flags: CharProperties) {
        match self
            .session
            .record_payload(now_millis(), self.format, payload, flags)
        {
            Ok(Some(value)) => debug!("Recorded {}", value),
            Ok(None) => {}
            Err(e) => warn!("Skipping payload {:02X?}: {}", payload, e),
        }
    }
}

fn open_session(
    args: &RecordArgs,
    config: &Config,
    database: &Path,
) -> Result<RecordingSession<StoreSink>> {
    let filter = resolve_filter(&args.filter, config)
        .build()
        .context("Invalid filter configuration")?;
    let recorder = RecorderConfig {
        buffer_size: args
            .buffer_size
            .or(config.buffer_size)
            .unwrap_or(RecorderConfig::default().buffer_size),
    };
    let run_id = args.run.clone().unwrap_or_else(default_run_id);
    let sensor_id = args
        .sensor
        .clone()
        .unwrap_or_else(|| args.target.characteristic.to_string());

    let store = Store::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let session = RecordingSession::new(run_id, sensor_id, StoreSink::new(store), recorder)
        .context("Invalid recorder configuration")?
        .with_filter(filter);
    Ok(session)
}

pub async fn cmd_record(
    args: RecordArgs,
    config: &Config,
    database: PathBuf,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    let device = require_device(resolve_device(args.target.device.clone(), config))?;
    let service = args.target.service;
    let characteristic = args.target.characteristic;
    let scan_timeout = resolve_scan_timeout(args.target.scan_timeout, config);
    let connect_timeout = Duration::from_secs(args.target.connect_timeout);

    let session = open_session(&args, config, &database)?;
    let mut recorder = Recorder {
        session,
        characteristic,
        format: args.format,
    };

    let transport =
        open_transport(BleTransportConfig::default().connect_timeout(connect_timeout)).await?;
    let (listener, mut signals) = ChannelListener::new();
    let runner = FlowRunner::spawn(transport, device.as_str(), listener);
    runner.build(subscribe_steps(scan_timeout, service, characteristic));

    let setup_timeout = Duration::from_secs(scan_timeout) + connect_timeout * 3;
    let setup = match run_to_end(&runner, &mut signals, setup_timeout).await {
        Ok(seen) => seen,
        Err(e) => {
            runner.close().await;
            recorder.session.discard();
            return Err(e.context(format!("Failed to subscribe to {}", characteristic)));
        }
    };
    let mut link_lost = false;
    for signal in setup {
        link_lost |= recorder.handle(signal);
    }

    if !quiet {
        info!(
            "Recording {} from {} as {}/{}{}",
            characteristic,
            device,
            recorder.session.run_id(),
            recorder.session.sensor_id(),
            if args.duration.is_some() { "" } else { " (Ctrl-C to stop)" }
        );
    }

    let deadline = args.duration.map(|s| Instant::now() + Duration::from_secs(s));
    let elapsed = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(elapsed);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let reason = if link_lost {
        StopReason::LinkLost
    } else {
        loop {
            tokio::select! {
                _ = &mut elapsed => break StopReason::Elapsed,
                _ = &mut interrupted => break StopReason::Interrupted,
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if recorder.handle(signal) {
                            break StopReason::LinkLost;
                        }
                    }
                    None => break StopReason::LinkLost,
                },
            }
        }
    };
    debug!("Recording stopped: {:?}", reason);

    if reason == StopReason::LinkLost {
        warn!("Lost connection to {}", device);
    } else {
        runner.build(teardown_steps(service, characteristic));
        if let Err(e) = run_to_end(&runner, &mut signals, TEARDOWN_TIMEOUT).await {
            warn!("Teardown failed: {:#}", e);
        }
    }
    runner.close().await;

    let run_id = recorder.session.run_id().to_string();
    let sensor_id = recorder.session.sensor_id().to_string();
    let (stats, mut sink) = recorder.session.stop();
    if sink.error_count() > 0 {
        for e in sink.take_errors() {
            warn!("Database write failed: {}", e);
        }
        warn!("{} database write(s) failed", sink.error_count());
    }

    write_output(output, &format_stats_text(&run_id, &sensor_id, &stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::uuids::from_short;

    #[test]
    fn test_subscribe_steps_with_and_without_scan() {
        let service = from_short(0x181a);
        let characteristic = from_short(0x2a6e);

        let names: Vec<_> = subscribe_steps(5, service, characteristic)
            .iter()
            .map(Step::name)
            .collect();
        assert_eq!(
            names,
            vec!["scan", "connect", "lookup_service", "lookup_characteristic", "enable_notify"]
        );

        let steps = subscribe_steps(0, service, characteristic);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].name(), "connect");
    }

    #[test]
    fn test_teardown_steps_end_with_disconnect() {
        let steps = teardown_steps(from_short(0x181a), from_short(0x2a6e));
        assert_eq!(steps.last().map(Step::name), Some("disconnect"));
        assert_eq!(steps[2].name(), "disable_notify");
    }
}
