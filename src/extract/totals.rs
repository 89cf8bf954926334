// src/extract/totals.rs

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use super::cells::{
    NumericCell, decimal_from_f64, read_numeric, round_to_format, row_has_stop_keyword,
};
use super::packing::{KeyColumns, is_implicit_total_row};
use super::{ColumnMapping, PackingTotals};
use crate::error::{ProcessingError, Warning};
use crate::merge::MergeSnapshot;
use crate::sheet::{CellValue, Sheet};

/// Rows after the last data row searched for the total row.
const TOTAL_ROW_WINDOW: u32 = 15;

/// Rows below the total row searched for packet counts.
const BELOW_TOTAL_ROWS: u32 = 3;

const MAX_PACKETS: u32 = 1000;

static PIECE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"件[数數]").expect("piece label regex"));

static PIECE_EMBEDDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"件[数數]\s*[:：]\s*(\d+)").expect("piece embedded regex"));

static PLT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PLT(?:\.G)?").expect("pallet indicator regex"));

/// Tried in order against each text cell below the total row. A pallet
/// count comes first so "共7托（172件）" reads as 7.
static BELOW_TOTAL_PATTERNS: LazyLock<[Regex; 5]> = LazyLock::new(|| {
    [
        r"(\d+)\s*托",
        r"^(\d+)\s*[（(]",
        r"(?i)^(\d+)\s*(?:托|箱|件|CTNS)\b",
        r"共\s*(\d+)\s*(?:托|箱|件)",
        r"(?i)PLT\s*#\s*(\d+)",
    ]
    .map(|p| Regex::new(p).expect("packet count regex"))
});

/// Finds the total row below the last data row: a keyword row first,
/// otherwise the first implicit total row.
pub fn detect_total_row<S: Sheet + ?Sized>(
    sheet: &S,
    last_data_row: u32,
    mapping: &ColumnMapping,
    merges: &MergeSnapshot,
) -> Result<u32, ProcessingError> {
    let cols = KeyColumns::from_mapping(mapping)?;
    let start = last_data_row + 1;
    let end = (last_data_row + TOTAL_ROW_WINDOW).min(sheet.max_row());

    if let Some(row) = (start..=end).find(|&row| row_has_stop_keyword(sheet, row)) {
        debug!(row, "total row by keyword");
        return Ok(row);
    }
    if let Some(row) = (start..=end).find(|&row| is_implicit_total_row(sheet, merges, row, cols)) {
        debug!(row, "implicit total row");
        return Ok(row);
    }
    Err(ProcessingError::TotalRowNotFound { start, end })
}

fn read_total<S: Sheet + ?Sized>(
    sheet: &S,
    row: u32,
    col: u32,
    field: &str,
) -> Result<(Decimal, u32), ProcessingError> {
    let value = sheet.value(row, col);
    match read_numeric(value) {
        NumericCell::Value(v) => Ok(round_to_format(v, sheet.number_format(row, col))),
        NumericCell::Empty | NumericCell::Invalid(_) => Err(ProcessingError::InvalidTotal {
            row,
            field: field.to_string(),
            value: value.display(),
        }),
    }
}

fn numeric_at<S: Sheet + ?Sized>(sheet: &S, row: u32, col: u32) -> Option<Decimal> {
    match read_numeric(sheet.value(row, col)) {
        NumericCell::Value(v) => Some(v),
        _ => None,
    }
}

/// Gross weight of the total row, unless the two rows below both carry
/// numbers: then the second one (pallet-inclusive) wins.
fn read_total_gw<S: Sheet + ?Sized>(
    sheet: &S,
    total_row: u32,
    gw_col: u32,
) -> Result<(Decimal, u32), ProcessingError> {
    let primary = read_total(sheet, total_row, gw_col, "total_gw")?;
    let below = total_row + 1;
    let pallet_row = total_row + 2;
    if numeric_at(sheet, below, gw_col).is_some()
        && let Some(value) = numeric_at(sheet, pallet_row, gw_col)
    {
        debug!(row = pallet_row, %value, "gross weight includes pallets");
        return Ok(round_to_format(value, sheet.number_format(pallet_row, gw_col)));
    }
    Ok(primary)
}

/// Whole count in 1..=MAX_PACKETS; fractions are truncated.
fn valid_packets(value: Decimal) -> Option<u32> {
    value
        .trunc()
        .to_u32()
        .filter(|n| (1..=MAX_PACKETS).contains(n))
}

fn parse_packets(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok().filter(|n| (1..=MAX_PACKETS).contains(n))
}

fn cell_packets(value: &CellValue) -> Option<u32> {
    match read_numeric(value) {
        NumericCell::Value(v) => valid_packets(v),
        _ => None,
    }
}

/// Tier 1: a 件数 label below the total row, with the count inside the
/// label or in one of the three cells to its right.
fn search_piece_label<S: Sheet + ?Sized>(sheet: &S, total_row: u32, max_col: u32) -> Option<u32> {
    let last_row = (total_row + BELOW_TOTAL_ROWS).min(sheet.max_row());
    for row in total_row + 1..=last_row {
        for col in 1..max_col {
            let Some(text) = sheet.value(row, col).as_text() else {
                continue;
            };
            if !PIECE_LABEL_RE.is_match(text) {
                continue;
            }
            let embedded = PIECE_EMBEDDED_RE
                .captures(text)
                .and_then(|caps| parse_packets(&caps[1]));
            if embedded.is_some() {
                return embedded;
            }
            let adjacent = (col + 1..(col + 4).min(max_col))
                .find_map(|c| cell_packets(sheet.value(row, c)));
            if adjacent.is_some() {
                return adjacent;
            }
        }
    }
    None
}

/// Tier 2: a PLT token in the two rows above the total row, with the count
/// beside it on either side.
fn search_pallet_indicator<S: Sheet + ?Sized>(sheet: &S, total_row: u32, max_col: u32) -> Option<u32> {
    let is_plt = |value: &CellValue| value.as_text().is_some_and(|t| PLT_RE.is_match(t.trim()));

    for row in [total_row.checked_sub(1), total_row.checked_sub(2)]
        .into_iter()
        .flatten()
        .filter(|&r| r >= 1)
    {
        for col in 1..max_col {
            let value = sheet.value(row, col);
            if let Some(n) = value.as_number() {
                let plt_beside = [col + 1, col - 1]
                    .into_iter()
                    .filter(|&c| c >= 1 && c < max_col)
                    .any(|c| is_plt(sheet.value(row, c)));
                if plt_beside && let Some(count) = decimal_packets(n) {
                    return Some(count);
                }
            }
            if is_plt(value) {
                let right = (col + 1..(col + 3).min(max_col))
                    .find_map(|c| cell_packets(sheet.value(row, c)));
                if right.is_some() {
                    return right;
                }
            }
        }
    }
    None
}

fn decimal_packets(n: f64) -> Option<u32> {
    decimal_from_f64(n).and_then(valid_packets)
}

/// Tier 3: count patterns in text cells below the total row.
fn search_below_total<S: Sheet + ?Sized>(sheet: &S, total_row: u32, max_col: u32) -> Option<u32> {
    let last_row = (total_row + BELOW_TOTAL_ROWS).min(sheet.max_row());
    for row in total_row + 1..=last_row {
        for col in 1..max_col {
            let Some(text) = sheet.value(row, col).as_text().map(str::trim) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            let found = BELOW_TOTAL_PATTERNS.iter().find_map(|re| {
                re.captures(text).and_then(|caps| parse_packets(&caps[1]))
            });
            if found.is_some() {
                debug!(row, col, text, "packet count from pattern");
                return found;
            }
        }
    }
    None
}

/// Reads net weight, gross weight and packet count around the total row.
/// A missing packet count is a warning, not an error.
pub fn extract_totals<S: Sheet + ?Sized>(
    sheet: &S,
    total_row: u32,
    mapping: &ColumnMapping,
) -> Result<(PackingTotals, Vec<Warning>), ProcessingError> {
    let cols = KeyColumns::from_mapping(mapping)?;
    let (total_nw, total_nw_precision) = read_total(sheet, total_row, cols.nw, "total_nw")?;
    let (total_gw, total_gw_precision) = read_total_gw(sheet, total_row, cols.gw)?;

    let max_col = 11.max(cols.nw + 3);
    let total_packets = search_piece_label(sheet, total_row, max_col)
        .or_else(|| search_pallet_indicator(sheet, total_row, max_col))
        .or_else(|| search_below_total(sheet, total_row, max_col));

    let mut warnings = Vec::new();
    if total_packets.is_none() {
        let warning = Warning::PacketCountNotFound { total_row };
        warn!(code = warning.code(), total_row, "{warning}");
        warnings.push(warning);
    }

    info!(
        total_row,
        %total_nw,
        %total_gw,
        packets = ?total_packets,
        "packing totals extracted"
    );
    Ok((
        PackingTotals {
            total_nw,
            total_nw_precision,
            total_gw,
            total_gw_precision,
            total_packets,
        },
        warnings,
    ))
}
