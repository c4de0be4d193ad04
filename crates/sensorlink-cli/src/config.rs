//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use sensorlink_core::filter::{FilterConfig, FrequencyConfig};

use crate::cli::FilterArgs;

/// Scan duration used when neither the command line nor the config sets one.
pub const DEFAULT_SCAN_TIMEOUT: u64 = 5;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device address
    #[serde(default)]
    pub device: Option<String>,

    /// Scan duration in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Database file
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Points per decimation pass
    #[serde(default)]
    pub buffer_size: Option<usize>,

    /// Default filter chain for `record`
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Config {
    /// Get the default config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensorlink")
            .join("config.toml")
    }

    /// Load config from an explicit file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Load `explicit` if given, otherwise the default file if present.
    ///
    /// A broken default file is reported and ignored; a broken explicit one
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let path = Self::path();
        if !path.exists() {
            return Ok(Self::default());
        }
        match Self::load_from(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("{:#}", e);
                Ok(Self::default())
            }
        }
    }
}

/// Resolve device from arg (or env var, via clap) or config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device.or_else(|| config.device.clone())
}

pub fn resolve_scan_timeout(cmd_timeout: Option<u64>, config: &Config) -> u64 {
    cmd_timeout
        .or(config.scan_timeout)
        .unwrap_or(DEFAULT_SCAN_TIMEOUT)
}

/// Database from arg, then config, then the platform default.
pub fn resolve_database(database: Option<PathBuf>, config: &Config) -> PathBuf {
    database
        .or_else(|| config.database.clone())
        .unwrap_or_else(sensorlink_store::default_db_path)
}

/// Merge command-line filter flags over the configured filter.
pub fn resolve_filter(args: &FilterArgs, config: &Config) -> FilterConfig {
    let mut filter = config.filter.clone();
    if let Some(scale) = args.scale {
        filter.scale = Some(scale);
    }
    if let Some(window_millis) = args.frequency_window {
        filter.frequency = Some(FrequencyConfig {
            window_millis,
            noise_floor: args.noise_floor,
            unit: args.frequency_unit,
        });
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core::filter::{FrequencyUnit, ScaleConfig};

    #[test]
    fn test_resolve_device_prefers_arg() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        let result = resolve_device(Some("arg-device".to_string()), &config);
        assert_eq!(result, Some("arg-device".to_string()));
    }

    #[test]
    fn test_resolve_device_falls_back_to_config() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_device(None, &config), Some("config-device".to_string()));
        assert_eq!(resolve_device(None, &Config::default()), None);
    }

    #[test]
    fn test_resolve_scan_timeout() {
        let config = Config {
            scan_timeout: Some(20),
            ..Default::default()
        };
        assert_eq!(resolve_scan_timeout(Some(3), &config), 3);
        assert_eq!(resolve_scan_timeout(None, &config), 20);
        assert_eq!(resolve_scan_timeout(None, &Config::default()), DEFAULT_SCAN_TIMEOUT);
    }

    #[test]
    fn test_parse_config_file() {
        let config: Config = toml::from_str(
            r#"
            device = "AA:BB:CC:DD:EE:FF"
            scan_timeout = 8
            database = "/tmp/runs.db"
            buffer_size = 50

            [filter.scale]
            source_bottom = 0.0
            source_top = 4095.0
            dest_bottom = 0.0
            dest_top = 3.3
            "#,
        )
        .unwrap();

        assert_eq!(config.device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.buffer_size, Some(50));
        assert_eq!(config.database, Some(PathBuf::from("/tmp/runs.db")));
        assert_eq!(config.filter.scale.unwrap().dest_top, 3.3);
        assert!(config.filter.frequency.is_none());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "buffer_size = 12\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().buffer_size, Some(12));
    }

    #[test]
    fn test_filter_flags_override_config() {
        let config = Config {
            filter: FilterConfig {
                frequency: None,
                scale: Some(ScaleConfig {
                    source_bottom: 0.0,
                    source_top: 1.0,
                    dest_bottom: 0.0,
                    dest_top: 2.0,
                }),
            },
            ..Default::default()
        };

        let kept = resolve_filter(&FilterArgs::default(), &config);
        assert_eq!(kept, config.filter);

        let args = FilterArgs {
            frequency_window: Some(1000),
            frequency_unit: FrequencyUnit::PerMinute,
            ..Default::default()
        };
        let merged = resolve_filter(&args, &config);
        assert_eq!(merged.scale, config.filter.scale);
        let frequency = merged.frequency.unwrap();
        assert_eq!(frequency.window_millis, 1000);
        assert_eq!(frequency.unit, FrequencyUnit::PerMinute);
    }
}
