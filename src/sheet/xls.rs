// src/sheet/xls.rs

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{Reader, Xls, open_workbook};
use tracing::debug;

use super::{GridSheet, MergeRange, WorkbookError, WorkbookSource};

/// Legacy BIFF workbooks. Number formats are not carried over, so every
/// cell reports General.
pub struct XlsSource {
    path: PathBuf,
    workbook: Xls<BufReader<File>>,
}

impl XlsSource {
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let workbook: Xls<_> = open_workbook(path).map_err(|e| WorkbookError::corrupt(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            workbook,
        })
    }
}

impl WorkbookSource for XlsSource {
    fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn load_sheet(&mut self, name: &str) -> Result<GridSheet, WorkbookError> {
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|e| WorkbookError::corrupt(&self.path, e))?;

        let mut sheet = GridSheet::new(name);
        sheet.fill_from_range(&range);

        let merges = self.workbook.worksheet_merge_cells(name).unwrap_or_default();
        debug!(sheet = name, merges = merges.len(), "loaded xls sheet");
        for dims in &merges {
            sheet.add_merge(MergeRange::from_dimensions(dims));
        }
        Ok(sheet)
    }
}
