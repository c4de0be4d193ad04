//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use sensorlink_core::runner::{FlowRunner, FlowSignal};
use sensorlink_core::{BleTransport, BleTransportConfig, Transport};

/// Get device identifier, with helpful error message.
pub fn require_device(device: Option<String>) -> Result<String> {
    device.ok_or_else(|| {
        anyhow::anyhow!(
            "No device specified. Use --device <ADDRESS>, set SENSORLINK_DEVICE, \
             or add `device = \"...\"` to the config file.\n\
             Run 'sensorlink scan' to find nearby devices."
        )
    })
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Run identifier derived from the current UTC time.
pub fn default_run_id() -> String {
    OffsetDateTime::now_utc()
        .replace_nanosecond(0)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| now_millis().to_string())
}

/// Open the first BLE adapter.
pub async fn open_transport(config: BleTransportConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = Arc::new(
        BleTransport::with_config(config)
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    Ok(transport)
}

/// Start the runner and collect signals until the run ends.
///
/// Fails on timeout, on a flow failure, or when the runner stops.
pub async fn run_to_end(
    runner: &FlowRunner,
    signals: &mut UnboundedReceiver<FlowSignal>,
    timeout: Duration,
) -> Result<Vec<FlowSignal>> {
    if !runner.run() {
        bail!("Flow runner for {} has stopped", runner.address());
    }
    let mut seen = Vec::new();
    let collected = tokio::time::timeout(timeout, async {
        while let Some(signal) = signals.recv().await {
            debug!("Flow signal: {:?}", signal);
            let terminal = signal.is_terminal();
            seen.push(signal);
            if terminal {
                return true;
            }
        }
        false
    })
    .await;

    match collected {
        Err(_) => bail!("Flow did not finish within {:?}", timeout),
        Ok(false) => bail!("Flow runner for {} stopped", runner.address()),
        Ok(true) => {}
    }
    if let Some(FlowSignal::Failure(e)) = seen.last() {
        return Err(e.clone()).context(format!("Flow for {} failed", runner.address()));
    }
    Ok(seen)
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_device_with_some() {
        let result = require_device(Some("AA:BB:CC:DD:EE:FF".to_string()));
        assert_eq!(result.unwrap(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_require_device_with_none() {
        let err = require_device(None).unwrap_err().to_string();
        assert!(err.contains("No device specified"));
        assert!(err.contains("SENSORLINK_DEVICE"));
    }

    #[test]
    fn test_default_run_id_is_rfc3339() {
        let id = default_run_id();
        assert!(OffsetDateTime::parse(&id, &Rfc3339).is_ok(), "{}", id);
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello\n");
    }
}
