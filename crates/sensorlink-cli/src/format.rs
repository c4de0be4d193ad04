//! Output formatting for scan results, recorded points and runs.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use sensorlink_store::StoredRun;
use sensorlink_types::{DiscoveredDevice, RunStats, StoredPoint};

fn format_millis(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}

// === Scan ===

pub fn format_scan_text(devices: &[DiscoveredDevice]) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }
    let mut out = format!("Found {} device(s)\n\n", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<20} {:<24} {:>8}",
            device.address,
            device.name.as_deref().unwrap_or("Unknown"),
            rssi
        );
        for service in &device.services {
            let _ = writeln!(out, "    service {}", service);
        }
    }
    out
}

pub fn format_scan_json(devices: &[DiscoveredDevice]) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: &'a [DiscoveredDevice],
    }

    let result = ScanResult {
        count: devices.len(),
        devices,
    };
    Ok(serde_json::to_string_pretty(&result)? + "\n")
}

pub fn format_scan_csv(devices: &[DiscoveredDevice]) -> String {
    let mut out = String::from("address,name,rssi\n");
    for device in devices {
        let _ = writeln!(
            out,
            "{},{},{}",
            device.address,
            csv_field(device.name.as_deref().unwrap_or("")),
            device.rssi.map(|r| r.to_string()).unwrap_or_default()
        );
    }
    out
}

// === Points ===

pub fn format_points_text(points: &[StoredPoint], tier: u32) -> String {
    if points.is_empty() {
        return format!("No points at tier {}.\n", tier);
    }
    let mut out = format!("{} point(s) at tier {}\n\n", points.len(), tier);
    for point in points {
        let _ = writeln!(out, "{:<32} {}", format_millis(point.timestamp_millis), point.value);
    }
    out
}

#[derive(Serialize)]
struct PointJson {
    timestamp: i64,
    value: f64,
}

pub fn format_points_json(points: &[StoredPoint], tier: u32) -> Result<String> {
    #[derive(Serialize)]
    struct QueryResult {
        tier: u32,
        count: usize,
        points: Vec<PointJson>,
    }

    let result = QueryResult {
        tier,
        count: points.len(),
        points: points
            .iter()
            .map(|p| PointJson {
                timestamp: p.timestamp_millis,
                value: p.value,
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&result)? + "\n")
}

pub fn format_points_csv(points: &[StoredPoint]) -> String {
    let mut out = String::from("timestamp,value\n");
    for point in points {
        let _ = writeln!(out, "{},{}", point.timestamp_millis, point.value);
    }
    out
}

// === Runs ===

pub fn format_stats_text(run_id: &str, sensor_id: &str, stats: &RunStats) -> String {
    format!(
        "Run {} / {}\n  points:   {}\n  duration: {:.1} s\n  min:      {}\n  max:      {}\n  average:  {:.4}\n  tiers:    {} (x{} per tier)\n",
        run_id,
        sensor_id,
        stats.count,
        stats.total_duration_millis as f64 / 1000.0,
        stats.minimum,
        stats.maximum,
        stats.average,
        stats.zoom_tiers,
        stats.zoom_level_between_tiers,
    )
}

pub fn format_runs_text(runs: &[StoredRun]) -> String {
    if runs.is_empty() {
        return "No recorded runs.\n".to_string();
    }
    let mut out = String::new();
    for run in runs {
        let _ = writeln!(
            out,
            "{:<28} {:<24} {:>8} pts  {:>2} tier(s)  {}",
            run.run_id,
            run.sensor_id,
            run.stats.count,
            run.stats.zoom_tiers,
            run.updated_at.format(&Rfc3339).unwrap_or_default()
        );
    }
    out
}

pub fn format_runs_json(runs: &[StoredRun]) -> Result<String> {
    Ok(serde_json::to_string_pretty(runs)? + "\n")
}

pub fn format_runs_csv(runs: &[StoredRun]) -> String {
    let mut out =
        String::from("run_id,sensor_id,count,minimum,maximum,average,duration_ms,zoom_tiers\n");
    for run in runs {
        let s = &run.stats;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            csv_field(&run.run_id),
            csv_field(&run.sensor_id),
            s.count,
            s.minimum,
            s.maximum,
            s.average,
            s.total_duration_millis,
            s.zoom_tiers
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::DeviceAddress;

    fn point(ts: i64, value: f64) -> StoredPoint {
        StoredPoint {
            run_id: "r".into(),
            sensor_id: "s".into(),
            tier: 1,
            timestamp_millis: ts,
            value,
        }
    }

    fn device(name: Option<&str>) -> DiscoveredDevice {
        DiscoveredDevice {
            address: DeviceAddress::new("AA:BB:CC:DD:EE:FF"),
            name: name.map(String::from),
            rssi: Some(-60),
            services: Vec::new(),
        }
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_millis(1_500), "1970-01-01T00:00:01.5Z");
    }

    #[test]
    fn test_scan_text_empty_and_filled() {
        assert_eq!(format_scan_text(&[]), "No devices found.\n");
        let text = format_scan_text(&[device(Some("Thermo"))]);
        assert!(text.contains("Found 1 device(s)"));
        assert!(text.contains("Thermo"));
        assert!(text.contains("-60 dBm"));
    }

    #[test]
    fn test_scan_json_and_csv() {
        let json = format_scan_json(&[device(None)]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["count"], 1);

        let csv = format_scan_csv(&[device(Some("a,b"))]);
        assert_eq!(csv.lines().nth(1), Some("AA:BB:CC:DD:EE:FF,\"a,b\",-60"));
    }

    #[test]
    fn test_points_outputs() {
        let points = vec![point(1_000, 2.5), point(2_000, -1.0)];
        assert!(format_points_text(&points, 1).starts_with("2 point(s) at tier 1"));
        assert_eq!(format_points_text(&[], 3), "No points at tier 3.\n");
        assert_eq!(format_points_csv(&points), "timestamp,value\n1000,2.5\n2000,-1\n");

        let json: serde_json::Value =
            serde_json::from_str(&format_points_json(&points, 1).unwrap()).unwrap();
        assert_eq!(json["points"][1]["value"], -1.0);
    }

    #[test]
    fn test_stats_text() {
        let stats = RunStats {
            count: 10,
            total_duration_millis: 900,
            zoom_tiers: 2,
            zoom_level_between_tiers: 5,
            ..RunStats::default()
        };
        let text = format_stats_text("run", "temp", &stats);
        assert!(text.contains("points:   10"));
        assert!(text.contains("duration: 0.9 s"));
        assert!(text.contains("2 (x5 per tier)"));
    }
}
