//! Run listing and deletion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use sensorlink_store::Store;

use crate::cli::OutputFormat;
use crate::format::{format_runs_csv, format_runs_json, format_runs_text};
use crate::util::write_output;

fn open(database: &Path) -> Result<Store> {
    Store::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))
}

pub fn cmd_runs(database: &Path, format: OutputFormat, output: Option<&PathBuf>) -> Result<()> {
    let runs = open(database)?.list_runs()?;
    let content = match format {
        OutputFormat::Text => format_runs_text(&runs),
        OutputFormat::Json => format_runs_json(&runs)?,
        OutputFormat::Csv => format_runs_csv(&runs),
    };
    write_output(output, &content)
}

pub fn cmd_delete(database: &Path, run_id: &str, output: Option<&PathBuf>) -> Result<()> {
    let deleted = open(database)?.delete_run(run_id)?;
    if deleted == 0 {
        bail!("No readings found for run '{}'", run_id);
    }
    write_output(output, &format!("Deleted run {} ({} points)\n", run_id, deleted))
}
