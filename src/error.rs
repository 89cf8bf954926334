// src/error.rs

use rust_decimal::Decimal;
use thiserror::Error;

use crate::extract::SheetType;
use crate::sheet::{MergeRange, WorkbookError};

/// A fatal problem with one input file. Processing of that file stops;
/// the batch moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("file is locked or cannot be opened: {path}")]
    FileLocked { path: String },

    #[error("file is corrupt or unreadable: {reason}")]
    FileCorrupt { reason: String },

    #[error("no sheet name matches the invoice patterns (sheets: {sheets:?})")]
    InvoiceSheetNotFound { sheets: Vec<String> },

    #[error("no sheet name matches the packing patterns (sheets: {sheets:?})")]
    PackingSheetNotFound { sheets: Vec<String> },

    #[error("{sheet} sheet: no header row in rows 7-30 with at least {min_cells} non-empty cells")]
    HeaderNotFound { sheet: SheetType, min_cells: usize },

    #[error("{sheet} sheet: required columns not found: {}", .fields.join(", "))]
    RequiredColumnsMissing { sheet: SheetType, fields: Vec<String> },

    #[error("invoice number not found in any column or in the header area")]
    InvoiceNumberNotFound,

    #[error("row {row}: required field '{field}' is empty")]
    EmptyRequiredField { row: u32, field: String },

    #[error("row {row}: invalid numeric value '{value}' in field '{field}'")]
    InvalidNumericValue { row: u32, field: String, value: String },

    #[error("merged {field} cell {range} is shared by different parts: {}", .parts.join(", "))]
    SharedMergedWeight {
        range: MergeRange,
        field: String,
        parts: Vec<String>,
    },

    #[error("no total row found in rows {start}-{end} of the packing sheet")]
    TotalRowNotFound { start: u32, end: u32 },

    #[error("total row {row}: {field} is missing or invalid ('{value}')")]
    InvalidTotal { row: u32, field: String, value: String },

    #[error("part '{part_no}' has non-positive aggregated net weight {weight}")]
    AggregatedWeightNonPositive { part_no: String, weight: Decimal },

    #[error("part '{part_no}' has non-positive aggregated quantity {qty}")]
    AggregatedQuantityZero { part_no: String, qty: Decimal },

    #[error("packing weights sum to {packing_sum} but total is {total_nw} (difference {difference})")]
    PackingSumMismatch {
        packing_sum: Decimal,
        total_nw: Decimal,
        difference: Decimal,
    },

    #[error("weight {weight} for part '{part_no}' rounds to zero at precision 5")]
    WeightRoundsToZero { part_no: String, weight: Decimal },

    #[error("remainder {remainder} for last part '{part_no}' is negative")]
    NegativeRemainder { part_no: String, remainder: Decimal },

    #[error("invoice parts not found in packing list: {}", .parts.join(", "))]
    InvoicePartsUnmatched { parts: Vec<String> },

    #[error("packing parts not found in invoice: {}", .parts.join(", "))]
    PackingPartsUnmatched { parts: Vec<String> },

    #[error("allocated weights sum to {allocated}, expected {total_nw}")]
    FinalSumMismatch { allocated: Decimal, total_nw: Decimal },

    #[error("cannot load output template {path}: {reason}")]
    TemplateLoadFailed { path: String, reason: String },

    #[error("cannot write output {path}: {reason}")]
    OutputWriteFailed { path: String, reason: String },
}

impl ProcessingError {
    /// Stable code used in the batch report.
    pub fn code(&self) -> &'static str {
        use ProcessingError::*;
        match self {
            FileLocked { .. } => "ERR_010",
            FileCorrupt { .. } => "ERR_011",
            InvoiceSheetNotFound { .. } => "ERR_012",
            PackingSheetNotFound { .. } => "ERR_013",
            HeaderNotFound { .. } => "ERR_014",
            RequiredColumnsMissing { .. } => "ERR_020",
            InvoiceNumberNotFound => "ERR_021",
            EmptyRequiredField { .. } => "ERR_030",
            InvalidNumericValue { .. } => "ERR_031",
            TotalRowNotFound { .. } => "ERR_032",
            InvalidTotal { field, .. } if field == "total_gw" => "ERR_034",
            InvalidTotal { .. } => "ERR_033",
            InvoicePartsUnmatched { .. } => "ERR_040",
            NegativeRemainder { .. } => "ERR_041",
            AggregatedWeightNonPositive { .. } => "ERR_042",
            PackingPartsUnmatched { .. } => "ERR_043",
            WeightRoundsToZero { .. } => "ERR_044",
            AggregatedQuantityZero { .. } => "ERR_045",
            SharedMergedWeight { .. } => "ERR_046",
            PackingSumMismatch { .. } => "ERR_047",
            FinalSumMismatch { .. } => "ERR_048",
            TemplateLoadFailed { .. } => "ERR_051",
            OutputWriteFailed { .. } => "ERR_052",
        }
    }
}

impl From<WorkbookError> for ProcessingError {
    fn from(err: WorkbookError) -> Self {
        match err {
            WorkbookError::Locked { path } => ProcessingError::FileLocked { path },
            WorkbookError::Corrupt { reason, .. } => ProcessingError::FileCorrupt { reason },
            other @ WorkbookError::Unsupported { .. } => ProcessingError::FileCorrupt {
                reason: other.to_string(),
            },
        }
    }
}

/// Something the operator should look at; the output is still written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("packet count not found near total row {total_row}")]
    PacketCountNotFound { total_row: u32 },

    #[error("currency '{value}' not in lookup table")]
    UnmatchedCurrency { value: String },

    #[error("country '{value}' not in lookup table")]
    UnmatchedCountry { value: String },
}

impl Warning {
    pub fn code(&self) -> &'static str {
        match self {
            Warning::PacketCountNotFound { .. } => "ATT_002",
            Warning::UnmatchedCurrency { .. } => "ATT_003",
            Warning::UnmatchedCountry { .. } => "ATT_004",
        }
    }
}
