//! Query command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use sensorlink_store::{ReadingQuery, Store};

use crate::cli::{OutputFormat, QueryArgs};
use crate::format::{format_points_csv, format_points_json, format_points_text};
use crate::util::write_output;

pub fn cmd_query(args: &QueryArgs, database: &Path, output: Option<&PathBuf>) -> Result<()> {
    let store = Store::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;

    let start = args.start.unwrap_or(i64::MIN);
    let end = args.end.unwrap_or(i64::MAX);
    let tier = match (args.tier, args.points) {
        (Some(tier), _) => tier,
        (None, Some(points)) => store.ideal_tier(&args.run, &args.sensor, start, end, points)?,
        (None, None) => 0,
    };

    let mut query = ReadingQuery::new()
        .run(&args.run)
        .sensor(&args.sensor)
        .tier(tier)
        .range(start, end);
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    let points = store.query_readings(&query)?;

    let content = match args.format {
        OutputFormat::Text => format_points_text(&points, tier),
        OutputFormat::Json => format_points_json(&points, tier)?,
        OutputFormat::Csv => format_points_csv(&points),
    };
    write_output(output, &content)
}
