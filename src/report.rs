// src/report.rs

use tracing::{Level, error, info, warn};

use crate::batch::BatchResult;
use crate::error::ProcessingError;
use crate::pipeline::FileStatus;

const SEP_MAJOR: &str =
    "===========================================================================";
const SEP_MINOR: &str =
    "---------------------------------------------------------------------------";

/// One message per error code, in first-seen order. Repeated codes keep the
/// first message and note how often they occurred.
pub fn condense_errors(errors: &[ProcessingError]) -> Vec<(&'static str, String)> {
    let mut condensed: Vec<(&'static str, String, usize)> = Vec::new();
    for err in errors {
        match condensed.iter_mut().find(|(code, _, _)| *code == err.code()) {
            Some(entry) => entry.2 += 1,
            None => condensed.push((err.code(), err.to_string(), 1)),
        }
    }
    condensed
        .into_iter()
        .map(|(code, message, n)| match n {
            1 => (code, message),
            n => (code, format!("{message} ({n} occurrences)")),
        })
        .collect()
}

/// Summary lines with the level each is logged at.
pub fn summary_lines(result: &BatchResult) -> Vec<(Level, String)> {
    let mut lines = vec![
        (Level::INFO, SEP_MAJOR.to_string()),
        (Level::INFO, format!("{:>45}", "BATCH PROCESSING SUMMARY")),
        (Level::INFO, SEP_MAJOR.to_string()),
    ];
    let counts = [
        ("Total files:", result.total()),
        ("Successful:", result.count(FileStatus::Success)),
        ("Attention:", result.count(FileStatus::Attention)),
        ("Failed:", result.count(FileStatus::Failed)),
    ];
    for (label, n) in counts {
        lines.push((Level::INFO, format!("{label:<20}{n}")));
    }
    lines.push((
        Level::INFO,
        format!("{:<20}{:.2} seconds", "Processing time:", result.elapsed.as_secs_f64()),
    ));
    lines.push((
        Level::INFO,
        format!("{:<20}{}", "Log file:", result.log_path.display()),
    ));
    lines.push((Level::INFO, SEP_MAJOR.to_string()));

    let failed: Vec<_> = result
        .file_results
        .iter()
        .filter(|r| r.status == FileStatus::Failed)
        .collect();
    let attention: Vec<_> = result
        .file_results
        .iter()
        .filter(|r| r.status == FileStatus::Attention)
        .collect();

    if !failed.is_empty() {
        lines.push((Level::ERROR, "FAILED FILES:".to_string()));
        for file in &failed {
            lines.push((Level::ERROR, format!("  {}:", file.filename)));
            for (code, message) in condense_errors(&file.errors) {
                lines.push((Level::ERROR, format!("    {code}: {message}")));
            }
        }
    }
    if !failed.is_empty() && !attention.is_empty() {
        lines.push((Level::INFO, SEP_MINOR.to_string()));
    }
    if !attention.is_empty() {
        lines.push((Level::WARN, "FILES NEEDING ATTENTION:".to_string()));
        for file in &attention {
            lines.push((Level::WARN, format!("  {}:", file.filename)));
            for w in &file.warnings {
                lines.push((Level::WARN, format!("    {}: {w}", w.code())));
            }
        }
    }
    lines
}

pub fn print_batch_summary(result: &BatchResult) {
    for (level, line) in summary_lines(result) {
        if level == Level::ERROR {
            error!("{line}");
        } else if level == Level::WARN {
            warn!("{line}");
        } else {
            info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::error::Warning;
    use crate::pipeline::FileResult;

    fn file(name: &str, errors: Vec<ProcessingError>, warnings: Vec<Warning>) -> FileResult {
        FileResult {
            filename: name.into(),
            status: FileStatus::from_outcome(&errors, &warnings),
            errors,
            warnings,
            conversion: None,
            output: None,
        }
    }

    fn batch(file_results: Vec<FileResult>) -> BatchResult {
        BatchResult {
            file_results,
            elapsed: Duration::from_millis(1234),
            log_path: PathBuf::from("/srv/process_log.txt"),
        }
    }

    fn texts(result: &BatchResult) -> Vec<String> {
        summary_lines(result).into_iter().map(|(_, line)| line).collect()
    }

    #[test]
    fn test_condense_errors() {
        let errors = vec![
            ProcessingError::EmptyRequiredField { row: 12, field: "qty".into() },
            ProcessingError::InvoiceNumberNotFound,
            ProcessingError::EmptyRequiredField { row: 15, field: "nw".into() },
        ];
        let condensed = condense_errors(&errors);
        assert_eq!(condensed.len(), 2);
        assert_eq!(condensed[0].0, "ERR_030");
        assert_eq!(condensed[0].1, "row 12: required field 'qty' is empty (2 occurrences)");
        assert_eq!(condensed[1].0, "ERR_021");
        assert!(!condensed[1].1.contains("occurrences"));
    }

    #[test]
    fn test_counts_and_timing() {
        let result = batch(vec![file("a.xlsx", vec![], vec![])]);
        let lines = texts(&result);
        assert!(lines.contains(&"Total files:        1".to_string()));
        assert!(lines.contains(&"Successful:         1".to_string()));
        assert!(lines.contains(&"Processing time:    1.23 seconds".to_string()));
        assert!(lines.contains(&"Log file:           /srv/process_log.txt".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("FAILED")));
    }

    #[test]
    fn test_separator_only_between_both_sections() {
        let failed = || file("bad.xlsx", vec![ProcessingError::InvoiceNumberNotFound], vec![]);
        let attention =
            || file("warn.xlsx", vec![], vec![Warning::PacketCountNotFound { total_row: 30 }]);

        let both = texts(&batch(vec![failed(), attention()]));
        assert!(both.contains(&SEP_MINOR.to_string()));
        let failed_at = both.iter().position(|l| l == "FAILED FILES:").unwrap();
        let attention_at = both.iter().position(|l| l == "FILES NEEDING ATTENTION:").unwrap();
        assert!(failed_at < attention_at);
        assert!(both.contains(&"    ATT_002: packet count not found near total row 30".to_string()));

        let only_failed = texts(&batch(vec![failed()]));
        assert!(!only_failed.contains(&SEP_MINOR.to_string()));
        assert!(only_failed.contains(&"  bad.xlsx:".to_string()));
    }

    #[test]
    fn test_failed_lines_log_at_error() {
        let result = batch(vec![file("bad.xlsx", vec![ProcessingError::InvoiceNumberNotFound], vec![])]);
        let lines = summary_lines(&result);
        let (level, _) = lines.iter().find(|(_, l)| l.contains("ERR_021")).unwrap();
        assert_eq!(*level, Level::ERROR);
    }
}
