use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use config::{Config, resolve_database, resolve_scan_timeout};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Completions are generated before tracing is set up
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "sensorlink", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let database = resolve_database(cli.database.clone(), &config);
    let output = cli.output.as_ref();

    match cli.command {
        Commands::Scan {
            timeout,
            service,
            max,
            format,
        } => {
            let timeout = resolve_scan_timeout(timeout, &config);
            commands::cmd_scan(timeout, service, max, format, output, cli.quiet).await
        }
        Commands::Record(args) => {
            commands::cmd_record(args, &config, database, output, cli.quiet).await
        }
        Commands::Push(args) => commands::cmd_push(args, &config, output, cli.quiet).await,
        Commands::Query(args) => commands::cmd_query(&args, &database, output),
        Commands::Runs { format } => commands::cmd_runs(&database, format, output),
        Commands::Delete { run } => commands::cmd_delete(&database, &run, output),
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
