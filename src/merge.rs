// src/merge.rs

use std::collections::HashMap;

use tracing::debug;

use crate::sheet::{CellValue, MergeRange, Sheet};

/// Merged ranges captured before a sheet is flattened.
///
/// After `capture` the sheet itself has no merges left; every lookup that
/// needs to know where a value "really" lives goes through here.
#[derive(Debug, Default)]
pub struct MergeSnapshot {
    ranges: Vec<MergeRange>,
    index: HashMap<(u32, u32), usize>,
}

impl MergeSnapshot {
    pub fn capture<S: Sheet + ?Sized>(sheet: &mut S) -> Self {
        let ranges = sheet.merged_ranges();

        let mut index = HashMap::new();
        for (i, range) in ranges.iter().enumerate() {
            for cell in range.cells() {
                index.insert(cell, i);
            }
        }

        // Unmerge from our own copy; the sheet's list shrinks as we go.
        for range in &ranges {
            sheet.unmerge(range);
        }

        debug!(sheet = sheet.name(), ranges = ranges.len(), "captured merges");
        Self { ranges, index }
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn range_at(&self, row: u32, col: u32) -> Option<&MergeRange> {
        self.index.get(&(row, col)).map(|&i| &self.ranges[i])
    }

    pub fn is_in_merge(&self, row: u32, col: u32) -> bool {
        self.index.contains_key(&(row, col))
    }

    /// True only for the top-left cell of a range.
    pub fn is_anchor(&self, row: u32, col: u32) -> bool {
        self.range_at(row, col)
            .is_some_and(|r| r.min_row == row && r.min_col == col)
    }

    /// Inside a range but not its anchor.
    pub fn is_continuation(&self, row: u32, col: u32) -> bool {
        self.is_in_merge(row, col) && !self.is_anchor(row, col)
    }

    pub fn anchor_value<'s, S: Sheet + ?Sized>(&self, sheet: &'s S, row: u32, col: u32) -> &'s CellValue {
        match self.range_at(row, col) {
            Some(r) => sheet.value(r.min_row, r.min_col),
            None => sheet.value(row, col),
        }
    }

    /// The cell sits in a range that starts strictly below the header.
    pub fn is_data_area_merge(&self, row: u32, col: u32, header_row: u32) -> bool {
        self.range_at(row, col).is_some_and(|r| r.min_row > header_row)
    }

    /// Top row of the cell's range, or `row` itself outside any range.
    pub fn first_row(&self, row: u32, col: u32) -> u32 {
        self.range_at(row, col).map_or(row, |r| r.min_row)
    }
}
