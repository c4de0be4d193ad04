//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use sensorlink_core::filter::{FrequencyUnit, ScaleConfig};
use sensorlink_types::PayloadFormat;
use sensorlink_types::uuids::from_short;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Parse a full UUID or a 16-bit SIG short form (`2a6e`, `0x2A6E`).
pub fn parse_uuid(s: &str) -> Result<Uuid, String> {
    let trimmed = s.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex.len() <= 4
        && let Ok(short) = u16::from_str_radix(hex, 16)
    {
        return Ok(from_short(short));
    }
    Uuid::parse_str(trimmed).map_err(|e| format!("invalid UUID '{}': {}", s, e))
}

fn parse_payload_format(s: &str) -> Result<PayloadFormat, String> {
    s.parse().map_err(|e: sensorlink_types::ParseError| e.to_string())
}

fn parse_scale(s: &str) -> Result<ScaleConfig, String> {
    s.parse()
        .map_err(|e: sensorlink_core::filter::FilterError| e.to_string())
}

fn parse_frequency_unit(s: &str) -> Result<FrequencyUnit, String> {
    s.parse()
        .map_err(|e: sensorlink_core::filter::FilterError| e.to_string())
}

/// Device and characteristic to talk to.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Device address (MAC address or peripheral ID), or use SENSORLINK_DEVICE env var
    #[arg(short, long, env = "SENSORLINK_DEVICE")]
    pub device: Option<String>,

    /// Service UUID (full or 16-bit short form)
    #[arg(short, long, value_parser = parse_uuid)]
    pub service: Uuid,

    /// Characteristic UUID (full or 16-bit short form)
    #[arg(short, long, value_parser = parse_uuid)]
    pub characteristic: Uuid,

    /// Connection timeout in seconds
    #[arg(short = 'T', long, default_value = "15")]
    pub connect_timeout: u64,

    /// Seconds to scan before connecting, so the adapter knows the device
    #[arg(long)]
    pub scan_timeout: Option<u64>,
}

/// Signal filter overrides.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Linear rescale as source_bottom:source_top:dest_bottom:dest_top
    #[arg(long, value_parser = parse_scale, allow_hyphen_values = true)]
    pub scale: Option<ScaleConfig>,

    /// Extract a frequency over this trailing window (milliseconds)
    #[arg(long)]
    pub frequency_window: Option<i64>,

    /// Unit of the extracted frequency (hz, rpm)
    #[arg(long, value_parser = parse_frequency_unit, default_value = "hz")]
    pub frequency_unit: FrequencyUnit,

    /// Noise floor added to the crossing threshold
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub noise_floor: f64,
}

#[derive(Debug, Clone, Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Payload encoding of the characteristic value
    #[arg(short, long, value_parser = parse_payload_format, default_value = "i16le")]
    pub format: PayloadFormat,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Run identifier (default: current UTC time)
    #[arg(long)]
    pub run: Option<String>,

    /// Sensor identifier (default: the characteristic UUID)
    #[arg(long)]
    pub sensor: Option<String>,

    /// Points per decimation pass
    #[arg(long)]
    pub buffer_size: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, Args)]
pub struct PushArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// File to stream to the characteristic
    #[arg(long)]
    pub file: PathBuf,

    /// MTU to request before writing
    #[arg(long, default_value = "247")]
    pub mtu: u16,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Run identifier
    #[arg(short, long)]
    pub run: String,

    /// Sensor identifier
    #[arg(short, long)]
    pub sensor: String,

    /// Tier to read
    #[arg(short, long, conflicts_with = "points")]
    pub tier: Option<u32>,

    /// Pick the tier showing about this many points over the window
    #[arg(short, long)]
    pub points: Option<u64>,

    /// Window start (milliseconds since the Unix epoch)
    #[arg(long, allow_hyphen_values = true)]
    pub start: Option<i64>,

    /// Window end (milliseconds since the Unix epoch)
    #[arg(long, allow_hyphen_values = true)]
    pub end: Option<i64>,

    /// Maximum number of points
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(author, version, about = "Record BLE scientific instruments", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long, global = true, env = "SENSORLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file (default: platform data directory)
    #[arg(long, global = true, env = "SENSORLINK_DATABASE")]
    pub database: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Only report devices advertising this service
        #[arg(short, long, value_parser = parse_uuid)]
        service: Option<Uuid>,

        /// Stop after this many devices
        #[arg(short, long)]
        max: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Record a notifying characteristic into the database
    Record(RecordArgs),

    /// Stream a file to a characteristic
    Push(PushArgs),

    /// Read recorded points back
    Query(QueryArgs),

    /// List recorded runs
    Runs {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a recorded run
    Delete {
        /// Run identifier
        #[arg(short, long)]
        run: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_uuid_short_and_full() {
        assert_eq!(parse_uuid("2a6e").unwrap(), from_short(0x2a6e));
        assert_eq!(parse_uuid("0x181A").unwrap(), from_short(0x181a));
        assert_eq!(
            parse_uuid("00002a6e-0000-1000-8000-00805f9b34fb").unwrap(),
            from_short(0x2a6e)
        );
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_parse_record_args() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "record",
            "--device",
            "AA:BB:CC:DD:EE:FF",
            "--service",
            "181a",
            "--characteristic",
            "2a6e",
            "--format",
            "u16be",
            "--scale",
            "0:4095:-10:10",
            "--frequency-window",
            "2000",
            "--frequency-unit",
            "rpm",
        ])
        .unwrap();

        let Commands::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.target.device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(args.target.characteristic, from_short(0x2a6e));
        assert_eq!(args.format, PayloadFormat::U16Be);
        assert_eq!(args.filter.scale.unwrap().dest_bottom, -10.0);
        assert_eq!(args.filter.frequency_window, Some(2000));
        assert_eq!(args.filter.frequency_unit, FrequencyUnit::PerMinute);
    }

    #[test]
    fn test_query_tier_conflicts_with_points() {
        let result = Cli::try_parse_from([
            "sensorlink", "query", "--run", "r", "--sensor", "s", "--tier", "1", "--points", "10",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_scale_rejected() {
        let result = Cli::try_parse_from([
            "sensorlink",
            "record",
            "--service",
            "181a",
            "--characteristic",
            "2a6e",
            "--scale",
            "1:2:3",
        ]);
        assert!(result.is_err());
    }
}
