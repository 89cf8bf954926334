// src/sheet/mod.rs

mod xls;
mod xlsx;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use calamine::{Data, Dimensions, Range};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// A merged block of cells. 1-based, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MergeRange {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl MergeRange {
    pub fn new(min_row: u32, min_col: u32, max_row: u32, max_col: u32) -> Self {
        Self {
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    /// Every (row, col) the range covers, anchor first.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.min_row..=self.max_row)
            .flat_map(move |row| (self.min_col..=self.max_col).map(move |col| (row, col)))
    }

    fn from_dimensions(dims: &Dimensions) -> Self {
        Self::new(dims.start.0 + 1, dims.start.1 + 1, dims.end.0 + 1, dims.end.1 + 1)
    }
}

impl fmt::Display for MergeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            column_letter(self.min_col),
            self.min_row,
            column_letter(self.max_col),
            self.max_row
        )
    }
}

/// Spreadsheet column letter for a 1-based column index (1 → A, 28 → AB).
pub fn column_letter(col: u32) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A single cell value as the extractors see it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

static EMPTY: CellValue = CellValue::Empty;

impl CellValue {
    /// Empty, or text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text rendering; integral numbers drop their fractional part.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => CellValue::Text(e.to_string()),
        }
    }
}

/// Read access to one worksheet, addressed 1-based.
pub trait Sheet {
    fn name(&self) -> &str;
    fn value(&self, row: u32, col: u32) -> &CellValue;
    /// Display number format; "General" when the cell carries none.
    fn number_format(&self, row: u32, col: u32) -> &str;
    fn merged_ranges(&self) -> Vec<MergeRange>;
    /// Removes the range, leaving only the anchor holding a value.
    fn unmerge(&mut self, range: &MergeRange);
    fn max_row(&self) -> u32;
    fn max_col(&self) -> u32;
}

/// In-memory worksheet. Both file backends materialize into this.
#[derive(Debug, Clone, Default)]
pub struct GridSheet {
    name: String,
    cells: HashMap<(u32, u32), CellValue>,
    formats: HashMap<(u32, u32), String>,
    merges: Vec<MergeRange>,
    max_row: u32,
    max_col: u32,
}

impl GridSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn set_value(&mut self, row: u32, col: u32, value: impl Into<CellValue>) {
        let value = value.into();
        if value == CellValue::Empty {
            self.cells.remove(&(row, col));
            return;
        }
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        self.cells.insert((row, col), value);
    }

    pub fn set_format(&mut self, row: u32, col: u32, format: impl Into<String>) {
        self.formats.insert((row, col), format.into());
    }

    pub fn add_merge(&mut self, range: MergeRange) {
        self.max_row = self.max_row.max(range.max_row);
        self.max_col = self.max_col.max(range.max_col);
        self.merges.push(range);
    }

    /// Copies a calamine range in at its absolute position.
    fn fill_from_range(&mut self, range: &Range<Data>) {
        let Some((start_row, start_col)) = range.start() else {
            return;
        };
        for (r, c, data) in range.cells() {
            if matches!(data, Data::Empty) {
                continue;
            }
            let row = start_row + r as u32 + 1;
            let col = start_col + c as u32 + 1;
            self.set_value(row, col, CellValue::from(data));
        }
    }
}

impl Sheet for GridSheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, row: u32, col: u32) -> &CellValue {
        self.cells.get(&(row, col)).unwrap_or(&EMPTY)
    }

    fn number_format(&self, row: u32, col: u32) -> &str {
        self.formats
            .get(&(row, col))
            .map(String::as_str)
            .unwrap_or("General")
    }

    fn merged_ranges(&self) -> Vec<MergeRange> {
        self.merges.clone()
    }

    fn unmerge(&mut self, range: &MergeRange) {
        self.merges.retain(|m| m != range);
        for cell in range.cells().skip(1) {
            self.cells.remove(&cell);
        }
    }

    fn max_row(&self) -> u32 {
        self.max_row
    }

    fn max_col(&self) -> u32 {
        self.max_col
    }
}

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("file is locked or not readable: {path}")]
    Locked { path: String },
    #[error("cannot read workbook {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("unsupported workbook extension: {path}")]
    Unsupported { path: String },
}

impl WorkbookError {
    fn corrupt(path: &Path, reason: impl fmt::Display) -> Self {
        WorkbookError::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// An opened workbook that can hand out its sheets.
pub trait WorkbookSource {
    fn sheet_names(&self) -> Vec<String>;
    fn load_sheet(&mut self, name: &str) -> Result<GridSheet, WorkbookError>;
}

/// Opens `.xlsx` or `.xls` by extension.
pub fn open_workbook(path: &Path) -> Result<Box<dyn WorkbookSource>, WorkbookError> {
    if let Err(e) = File::open(path) {
        return Err(match e.kind() {
            ErrorKind::PermissionDenied => WorkbookError::Locked {
                path: path.display().to_string(),
            },
            _ => WorkbookError::corrupt(path, e),
        });
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    debug!(path = %path.display(), ext = %ext, "opening workbook");

    match ext.as_str() {
        "xlsx" => Ok(Box::new(xlsx::XlsxSource::open(path)?)),
        "xls" => Ok(Box::new(xls::XlsSource::open(path)?)),
        _ => Err(WorkbookError::Unsupported {
            path: path.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(28), "AB");
        assert_eq!(column_letter(40), "AN");
    }

    #[test]
    fn test_merge_range_display_and_cells() {
        let range = MergeRange::new(10, 2, 12, 3);
        assert_eq!(range.to_string(), "B10:C12");
        let cells: Vec<_> = range.cells().collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], (10, 2));
        assert!(range.contains(11, 3));
        assert!(!range.contains(13, 3));
    }

    #[test]
    fn test_display_drops_integral_fraction() {
        assert_eq!(CellValue::Number(91600.0).display(), "91600");
        assert_eq!(CellValue::Number(2.5).display(), "2.5");
        assert_eq!(CellValue::Empty.display(), "");
    }

    #[test]
    fn test_unmerge_keeps_anchor_only() {
        let mut sheet = GridSheet::new("Packing");
        sheet.set_value(5, 1, "A");
        sheet.set_value(6, 1, "stale");
        let range = MergeRange::new(5, 1, 6, 1);
        sheet.add_merge(range);
        sheet.unmerge(&range);
        assert!(sheet.merged_ranges().is_empty());
        assert_eq!(sheet.value(5, 1), &CellValue::from("A"));
        assert!(sheet.value(6, 1).is_blank());
    }

    #[test]
    fn test_missing_format_is_general() {
        let mut sheet = GridSheet::new("Invoice");
        sheet.set_format(3, 3, "0.00");
        assert_eq!(sheet.number_format(3, 3), "0.00");
        assert_eq!(sheet.number_format(1, 1), "General");
    }

    #[test]
    fn test_open_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.csv");
        std::fs::write(&path, "a,b").unwrap();
        let err = open_workbook(&path).err().unwrap();
        assert!(matches!(err, WorkbookError::Unsupported { .. }));
    }
}
