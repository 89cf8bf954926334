// src/main.rs

mod allocate;
mod batch;
mod config;
mod error;
mod extract;
mod merge;
mod output;
mod pipeline;
mod report;
mod sheet;
mod transform;

#[cfg(test)]
mod test_support;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use crate::batch::{LOG_FILE, run_batch};
use crate::config::AppConfig;
use crate::pipeline::FileStatus;
use crate::report::print_batch_summary;

const CONFIG_FILE: &str = "config/autoconvert.toml";
const DATA_DIR: &str = "data";

/// Vendor invoice and packing list to customs template converter.
#[derive(Debug, Parser)]
#[command(name = "autoconvert", version)]
struct Cli {
    /// Directory holding config/ and data/
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Process a single file with DEBUG console output
    #[arg(long, value_name = "FILE")]
    diagnostic: Option<PathBuf>,

    /// Print each converted file's items and totals as JSON
    #[arg(long)]
    json: bool,
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Console output filtered by RUST_LOG (INFO by default, DEBUG when
/// diagnosing) plus a DEBUG log file when it can be opened.
fn init_tracing(diagnostic: bool, log_path: &Path) {
    let default = if diagnostic { "debug" } else { "info" };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_filter(console_filter);

    let (log_file, log_error) = match open_log(log_path) {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::DEBUG)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    if let Some(e) = log_error {
        warn!(path = %log_path.display(), error = %e, "log file unavailable, console only");
    }
}

fn print_json(results: &[pipeline::FileResult]) -> Result<(), serde_json::Error> {
    for result in results {
        let Some(conversion) = &result.conversion else {
            continue;
        };
        let doc = serde_json::json!({
            "file": result.filename,
            "status": result.status,
            "conversion": conversion,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    Ok(())
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.diagnostic.is_some(), &cli.base_dir.join(LOG_FILE));

    let cfg = match AppConfig::load(cli.base_dir.join(CONFIG_FILE)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return Ok(ExitCode::from(2));
        }
    };

    let data_dir = cli.base_dir.join(DATA_DIR);
    let result = match run_batch(&cfg, &data_dir, cli.diagnostic.as_deref()) {
        Ok(result) => result,
        Err(e) => {
            error!("{e}");
            return Ok(ExitCode::from(2));
        }
    };

    print_batch_summary(&result);
    if cli.json {
        print_json(&result.file_results)?;
    }

    let failed = result.count(FileStatus::Failed);
    info!(files = result.total(), failed, "batch finished");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
