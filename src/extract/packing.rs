// src/extract/packing.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::{debug, info};

use super::cells::{
    NumericCell, cell_text, is_ditto, read_numeric, round_half_up, round_to_format,
    row_has_stop_keyword,
};
use super::invoice::required_col;
use super::{ColumnMapping, PackingItem};
use crate::error::ProcessingError;
use crate::merge::MergeSnapshot;
use crate::sheet::{CellValue, Sheet};

const PALLET_KEYWORDS: [&str; 6] = ["plt.", "pallet", "pallets", "棧板", "栈板", "plt"];
const UNIT_LABELS: [&str; 5] = ["kgs", "kgs.", "kg", "lbs", "lb"];

const WEIGHT_DECIMALS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Keyword,
    ImplicitTotal,
    Blank,
}

/// Columns the packing walk and the total-row search both look at.
#[derive(Debug, Clone, Copy)]
pub(super) struct KeyColumns {
    pub part: u32,
    pub qty: u32,
    pub nw: u32,
    pub gw: u32,
}

impl KeyColumns {
    pub(super) fn from_mapping(mapping: &ColumnMapping) -> Result<Self, ProcessingError> {
        Ok(Self {
            part: required_col(mapping, "part_no")?,
            qty: required_col(mapping, "qty")?,
            nw: required_col(mapping, "nw")?,
            gw: required_col(mapping, "gw")?,
        })
    }
}

fn number(value: &CellValue, field: &str, row: u32) -> Result<Decimal, ProcessingError> {
    match read_numeric(value) {
        NumericCell::Value(v) => Ok(v),
        NumericCell::Empty => Err(ProcessingError::EmptyRequiredField {
            row,
            field: field.to_string(),
        }),
        NumericCell::Invalid(raw) => Err(ProcessingError::InvalidNumericValue {
            row,
            field: field.to_string(),
            value: raw,
        }),
    }
}

fn blank_or_ditto(value: &CellValue) -> bool {
    value.is_blank() || is_ditto(value)
}

/// Empty part number with positive net and gross weight, where the part
/// cell is not the tail of a vertical merge.
pub(super) fn is_implicit_total_row<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    cols: KeyColumns,
) -> bool {
    if !sheet.value(row, cols.part).is_blank() || merges.is_continuation(row, cols.part) {
        return false;
    }
    let positive = |col: u32| {
        let value = sheet.value(row, col);
        !blank_or_ditto(value)
            && matches!(read_numeric(value), NumericCell::Value(n) if n > Decimal::ZERO)
    };
    positive(cols.nw) && positive(cols.gw)
}

fn stop_reason<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    cols: KeyColumns,
    seen_data: bool,
) -> Option<StopReason> {
    if row_has_stop_keyword(sheet, row) {
        return Some(StopReason::Keyword);
    }
    if is_implicit_total_row(sheet, merges, row, cols) {
        return Some(StopReason::ImplicitTotal);
    }
    let blank = sheet.value(row, cols.part).is_blank()
        && blank_or_ditto(sheet.value(row, cols.nw))
        && blank_or_ditto(sheet.value(row, cols.gw));
    (seen_data && blank && !merges.is_continuation(row, cols.part)).then_some(StopReason::Blank)
}

fn is_pallet_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    PALLET_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Pallet counts or a stray unit label in the weight column.
fn is_summary_row(part_no: &str, nw: &CellValue) -> bool {
    if is_pallet_text(part_no) {
        return true;
    }
    match nw.as_text().map(str::trim) {
        Some(text) if !text.is_empty() => {
            is_pallet_text(text) || UNIT_LABELS.contains(&text.to_lowercase().as_str())
        }
        _ => false,
    }
}

/// Reads packing rows below the header. Returns the items and the last row
/// that produced one, which anchors the total-row search.
pub fn extract_packing_items<S: Sheet + ?Sized>(
    sheet: &S,
    mapping: &ColumnMapping,
    merges: &MergeSnapshot,
) -> Result<(Vec<PackingItem>, u32), ProcessingError> {
    let cols = KeyColumns::from_mapping(mapping)?;
    let start_row = mapping.effective_header_row + 1;

    let mut items: Vec<PackingItem> = Vec::new();
    let mut last_data_row = start_row;
    let mut prev_part: Option<String> = None;

    for row in start_row..=sheet.max_row() {
        if let Some(reason) = stop_reason(sheet, merges, row, cols, !items.is_empty()) {
            debug!(row, ?reason, "packing extraction stopped");
            break;
        }

        let part_raw = sheet.value(row, cols.part);
        let qty_raw = sheet.value(row, cols.qty);
        let nw_raw = sheet.value(row, cols.nw);

        let part_empty = part_raw.is_blank();
        let part_no = if part_empty && merges.is_continuation(row, cols.part) {
            cell_text(merges.anchor_value(sheet, row, cols.part))
        } else {
            cell_text(part_raw)
        };

        if part_no.to_lowercase().contains("part no") {
            debug!(row, "header continuation row skipped");
            continue;
        }
        if is_summary_row(&part_no, nw_raw) {
            debug!(row, "pallet or summary row skipped");
            continue;
        }

        let same_as_prev = prev_part.as_deref() == Some(part_no.as_str());
        let has_prev = prev_part.is_some();

        let (nw, is_first_row_of_merge) = if is_ditto(nw_raw) || merges.is_continuation(row, cols.nw) {
            (Decimal::ZERO, false)
        } else if nw_raw.is_blank() {
            if has_prev && (same_as_prev || part_empty) {
                (Decimal::ZERO, false)
            } else {
                return Err(ProcessingError::EmptyRequiredField {
                    row,
                    field: "nw".to_string(),
                });
            }
        } else {
            (round_half_up(number(nw_raw, "nw", row)?, WEIGHT_DECIMALS), true)
        };

        let qty = if merges.is_continuation(row, cols.qty) {
            Decimal::ZERO
        } else if qty_raw.is_blank() {
            if has_prev && (same_as_prev || part_empty) {
                Decimal::ZERO
            } else {
                return Err(ProcessingError::EmptyRequiredField {
                    row,
                    field: "qty".to_string(),
                });
            }
        } else {
            let raw = number(qty_raw, "qty", row)?;
            round_to_format(raw, sheet.number_format(row, cols.qty)).0
        };

        let part_no = match (part_no.is_empty(), &prev_part) {
            (false, _) => part_no,
            (true, Some(prev)) => prev.clone(),
            (true, None) => {
                return Err(ProcessingError::EmptyRequiredField {
                    row,
                    field: "part_no".to_string(),
                });
            }
        };

        if qty.is_zero() && nw.is_zero() {
            debug!(row, part = %part_no, "zero row dropped");
            continue;
        }

        items.push(PackingItem {
            part_no: part_no.clone(),
            qty,
            nw,
            is_first_row_of_merge,
            source_row: row,
        });
        last_data_row = row;
        prev_part = Some(part_no);
    }

    info!(
        sheet = sheet.name(),
        items = items.len(),
        start_row,
        last_data_row,
        "packing items extracted"
    );
    Ok((items, last_data_row))
}

/// Fails when one merged weight or quantity cell spans rows of different
/// parts; the weight cannot be attributed.
pub fn validate_merged_weights(
    items: &[PackingItem],
    merges: &MergeSnapshot,
    mapping: &ColumnMapping,
) -> Result<(), ProcessingError> {
    let cols = KeyColumns::from_mapping(mapping)?;
    let row_to_part: HashMap<u32, &str> = items
        .iter()
        .map(|item| (item.source_row, item.part_no.as_str()))
        .collect();

    let mut checked = HashSet::new();
    for item in items {
        for (col, field) in [(cols.nw, "nw"), (cols.qty, "qty")] {
            let Some(range) = merges.range_at(item.source_row, col) else {
                continue;
            };
            if !merges.is_data_area_merge(item.source_row, col, mapping.header_row)
                || !checked.insert(*range)
            {
                continue;
            }
            let top = merges.first_row(item.source_row, col);
            let parts: BTreeSet<&str> = (top..=range.max_row)
                .filter_map(|r| row_to_part.get(&r).copied())
                .collect();
            if parts.len() > 1 {
                return Err(ProcessingError::SharedMergedWeight {
                    range: *range,
                    field: field.to_string(),
                    parts: parts.into_iter().map(str::to_string).collect(),
                });
            }
        }
    }
    debug!(ranges = checked.len(), "merged weight cells validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SheetType;
    use crate::extract::header::map_columns;
    use crate::sheet::{GridSheet, MergeRange};
    use crate::test_support::{config, d, put_row, sheet};

    fn packing_sheet(rows: &[(u32, &[&str])]) -> GridSheet {
        let mut s = sheet("Packing", &[(9, &["Part No", "Qty", "N.W.", "G.W."])]);
        for (row, cells) in rows {
            put_row(&mut s, *row, cells);
        }
        s
    }

    fn extract(s: &mut GridSheet) -> Result<(Vec<PackingItem>, u32), ProcessingError> {
        let merges = MergeSnapshot::capture(s);
        let mapping = map_columns(&*s, 9, SheetType::Packing, &config()).unwrap();
        extract_packing_items(&*s, &mapping, &merges)
    }

    #[test]
    fn test_rows_until_blank() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "1.5", "2"]),
            (11, &["B", "5", "2.5", "3"]),
            (13, &["C", "1", "1", "1"]),
        ]);
        let (items, last) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(last, 11);
        assert_eq!(items[1].nw, d("2.5"));
        assert!(items[0].is_first_row_of_merge);
    }

    #[test]
    fn test_implicit_total_row_stops() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "1.5", "2"]),
            (11, &["", "", "1.5", "2"]),
        ]);
        let (items, last) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(last, 10);
    }

    #[test]
    fn test_keyword_row_stops() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "1.5", "2"]),
            (11, &["合计", "10", "1.5", "2"]),
            (12, &["B", "10", "1.5", "2"]),
        ]);
        assert_eq!(extract(&mut s).unwrap().0.len(), 1);
    }

    #[test]
    fn test_merged_and_ditto_weights_are_zeroed() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["A", "5"]),
            (12, &["A", "2", "\"", "\""]),
        ]);
        s.add_merge(MergeRange::new(10, 3, 11, 3));
        s.add_merge(MergeRange::new(10, 4, 11, 4));
        let (items, _) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].nw, Decimal::ZERO);
        assert!(!items[1].is_first_row_of_merge);
        assert_eq!(items[2].nw, Decimal::ZERO);
        assert!(!items[2].is_first_row_of_merge);
        assert_eq!(items[2].qty, d("2"));
    }

    #[test]
    fn test_implicit_continuation_takes_previous_part() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["", "5", "", "1"]),
        ]);
        let (items, _) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].part_no, "A");
        assert_eq!(items[1].qty, d("5"));
        assert!(!items[1].is_first_row_of_merge);
    }

    #[test]
    fn test_vertical_part_merge_propagates() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["", "4", "1", "1.2"]),
        ]);
        s.add_merge(MergeRange::new(10, 1, 11, 1));
        let (items, _) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].part_no, "A");
        assert!(items[1].is_first_row_of_merge);
    }

    #[test]
    fn test_pallet_and_unit_rows_skipped() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["2 PALLETS", "", "", "5"]),
            (12, &["B", "", "KGS", ""]),
            (13, &["C", "1", "1", "1"]),
        ]);
        let (items, last) = extract(&mut s).unwrap();
        let parts: Vec<&str> = items.iter().map(|i| i.part_no.as_str()).collect();
        assert_eq!(parts, ["A", "C"]);
        assert_eq!(last, 13);
    }

    #[test]
    fn test_zero_rows_dropped() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["A", "0", "0", "1"]),
            (12, &["B", "2", "1", "1"]),
        ]);
        let (items, _) = extract(&mut s).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].part_no, "B");
    }

    #[test]
    fn test_first_row_without_weight_fails() {
        let mut s = packing_sheet(&[(10, &["A", "10", "", "3.5"])]);
        assert_eq!(
            extract(&mut s).unwrap_err(),
            ProcessingError::EmptyRequiredField {
                row: 10,
                field: "nw".into()
            }
        );
    }

    #[test]
    fn test_invalid_weight_fails() {
        let mut s = packing_sheet(&[(10, &["A", "10", "abc", "3.5"])]);
        assert!(matches!(
            extract(&mut s).unwrap_err(),
            ProcessingError::InvalidNumericValue { row: 10, .. }
        ));
    }

    #[test]
    fn test_shared_merged_weight_detected() {
        let mut s = packing_sheet(&[
            (10, &["B", "10", "3", "3.5"]),
            (11, &["A", "5"]),
        ]);
        s.add_merge(MergeRange::new(10, 3, 11, 3));
        let merges = MergeSnapshot::capture(&mut s);
        let mapping = map_columns(&s, 9, SheetType::Packing, &config()).unwrap();
        let (items, _) = extract_packing_items(&s, &mapping, &merges).unwrap();
        let err = validate_merged_weights(&items, &merges, &mapping).unwrap_err();
        assert_eq!(
            err,
            ProcessingError::SharedMergedWeight {
                range: MergeRange::new(10, 3, 11, 3),
                field: "nw".into(),
                parts: vec!["A".into(), "B".into()],
            }
        );
    }

    #[test]
    fn test_same_part_merge_is_valid() {
        let mut s = packing_sheet(&[
            (10, &["A", "10", "3", "3.5"]),
            (11, &["A", "5"]),
        ]);
        s.add_merge(MergeRange::new(10, 3, 11, 3));
        let merges = MergeSnapshot::capture(&mut s);
        let mapping = map_columns(&s, 9, SheetType::Packing, &config()).unwrap();
        let (items, _) = extract_packing_items(&s, &mapping, &merges).unwrap();
        assert!(validate_merged_weights(&items, &merges, &mapping).is_ok());
    }
}
