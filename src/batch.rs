// src/batch.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::pipeline::{FileResult, FileStatus, process_file};

pub const FINISHED_DIR: &str = "finished";
pub const LOG_FILE: &str = "process_log.txt";

/// Problems that stop the whole run before any file is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot prepare directory {path}: {source}")]
    Directory { path: String, source: io::Error },

    #[error("diagnostic file not found: {path}")]
    DiagnosticFileMissing { path: String },
}

#[derive(Debug)]
pub struct BatchResult {
    pub file_results: Vec<FileResult>,
    pub elapsed: Duration,
    pub log_path: PathBuf,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.file_results.len()
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.file_results.iter().filter(|r| r.status == status).count()
    }
}

/// The log sits next to the data directory.
pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.parent().unwrap_or(data_dir).join(LOG_FILE)
}

fn dir_error(path: &Path) -> impl FnOnce(io::Error) -> BatchError + '_ {
    move |source| BatchError::Directory {
        path: path.display().to_string(),
        source,
    }
}

/// Removes files from the output directory; subdirectories stay.
fn clear_finished(finished: &Path) -> Result<(), BatchError> {
    for entry in fs::read_dir(finished).map_err(dir_error(finished))? {
        let path = entry.map_err(dir_error(finished))?.path();
        if path.is_file() {
            fs::remove_file(&path).map_err(dir_error(&path))?;
        }
    }
    Ok(())
}

fn is_input_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with("~$") || name.starts_with('.') {
        return false;
    }
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls"))
}

/// Workbooks in `data_dir`, sorted by file name.
fn scan_inputs(data_dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(data_dir).map_err(dir_error(data_dir))? {
        let path = entry.map_err(dir_error(data_dir))?.path();
        if is_input_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn resolve_diagnostic(file: &Path, data_dir: &Path) -> Result<PathBuf, BatchError> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        data_dir.join(file)
    };
    if !path.exists() {
        return Err(BatchError::DiagnosticFileMissing {
            path: path.display().to_string(),
        });
    }
    Ok(path)
}

fn log_outcome(result: &FileResult) {
    match result.status {
        FileStatus::Success => info!(file = %result.filename, "SUCCESS"),
        FileStatus::Attention => {
            for w in &result.warnings {
                warn!(code = w.code(), "{w}");
            }
            warn!(file = %result.filename, "ATTENTION");
        }
        FileStatus::Failed => {
            for e in &result.errors {
                error!(code = e.code(), "{e}");
            }
            error!(file = %result.filename, "FAILED");
        }
    }
}

/// Converts every workbook in `data_dir` into `data_dir/finished`. With a
/// diagnostic file only that file runs and earlier output is kept.
pub fn run_batch(
    config: &AppConfig,
    data_dir: &Path,
    diagnostic: Option<&Path>,
) -> Result<BatchResult, BatchError> {
    let finished = data_dir.join(FINISHED_DIR);
    fs::create_dir_all(&finished).map_err(dir_error(&finished))?;

    let files = match diagnostic {
        Some(file) => vec![resolve_diagnostic(file, data_dir)?],
        None => {
            clear_finished(&finished)?;
            scan_inputs(data_dir)?
        }
    };
    if files.is_empty() {
        info!(dir = %data_dir.display(), "no processable files found");
    }

    let start = Instant::now();
    let mut file_results = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        info!(index = i + 1, total = files.len(), file = %path.display(), "processing");
        let result = process_file(path, config, &finished);
        log_outcome(&result);
        file_results.push(result);
    }

    Ok(BatchResult {
        file_results,
        elapsed: start.elapsed(),
        log_path: log_path(data_dir),
    })
}
