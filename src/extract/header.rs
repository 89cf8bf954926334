// src/extract/header.rs

use std::collections::HashMap;
use std::ops::RangeInclusive;

use tracing::{debug, info};

use super::cells::{is_numeric_looking, normalize_header};
use super::{ColumnMapping, SheetType};
use crate::config::{AppConfig, FieldPattern, FieldType};
use crate::error::ProcessingError;
use crate::sheet::Sheet;

const HEADER_SCAN_ROWS: RangeInclusive<u32> = 7..=30;
const HEADER_SCAN_COLS: u32 = 13;

/// Columns examined when mapping header text to fields.
pub const MAP_SCAN_COLS: u32 = 20;

/// A row with this many numeric-looking cells reads as data, not headers.
const DATA_LIKE_THRESHOLD: usize = 3;

const HEADER_KEYWORDS: [&str; 24] = [
    "qty", "n.w.", "g.w.", "part no", "amount", "price", "quantity", "weight", "品牌", "料号",
    "数量", "单价", "金额", "净重", "毛重", "原产", "country", "origin", "brand", "model",
    "description", "unit", "currency", "coo",
];

const METADATA_MARKERS: [&str; 5] = ["Tel:", "Fax:", "Cust ID:", "Contact:", "Address:"];

/// Non-empty trimmed texts of the first `max_cols` cells, with their column.
fn row_texts<S: Sheet + ?Sized>(sheet: &S, row: u32, max_cols: u32) -> Vec<(u32, String)> {
    (1..=max_cols)
        .filter_map(|col| {
            let text = sheet.value(row, col).display().trim().to_string();
            (!text.is_empty()).then_some((col, text))
        })
        .collect()
}

fn count_numeric(texts: &[(u32, String)]) -> usize {
    texts.iter().filter(|(_, t)| is_numeric_looking(t)).count()
}

/// 0 = keyword row, 1 = plain row, 2 = metadata or data-like row.
fn header_tier(cells: &[(u32, String)]) -> u8 {
    let numeric = count_numeric(cells);
    let has_keyword = cells.iter().any(|(_, text)| {
        let lower = text.to_lowercase();
        HEADER_KEYWORDS.iter().any(|kw| lower.contains(kw))
    });
    let has_metadata = cells
        .iter()
        .any(|(_, text)| METADATA_MARKERS.iter().any(|m| text.contains(m)));

    if has_keyword && numeric < 2 {
        0
    } else if has_metadata || numeric >= DATA_LIKE_THRESHOLD {
        2
    } else {
        1
    }
}

/// Finds the header row in rows 7-30. Lowest tier wins; the topmost row
/// wins a tie.
pub fn detect_header_row<S: Sheet + ?Sized>(
    sheet: &S,
    sheet_type: SheetType,
    config: &AppConfig,
) -> Result<u32, ProcessingError> {
    let min_cells = config.min_header_cells(sheet_type);
    let mut best: Option<(u8, u32)> = None;

    for row in HEADER_SCAN_ROWS {
        let cells: Vec<_> = row_texts(sheet, row, HEADER_SCAN_COLS)
            .into_iter()
            .filter(|(_, text)| !text.starts_with("Unnamed:"))
            .collect();
        if cells.len() < min_cells {
            continue;
        }

        let tier = header_tier(&cells);
        debug!(row, tier, cells = cells.len(), "header candidate");
        if best.is_none_or(|(best_tier, _)| tier < best_tier) {
            best = Some((tier, row));
        }
    }

    match best {
        Some((tier, row)) => {
            info!(sheet = %sheet_type, row, tier, "header row detected");
            Ok(row)
        }
        None => Err(ProcessingError::HeaderNotFound {
            sheet: sheet_type,
            min_cells,
        }),
    }
}

/// Maps each header cell to the first still-unmapped field whose pattern
/// matches it.
fn scan_row_for_fields<S: Sheet + ?Sized>(
    sheet: &S,
    row: u32,
    fields: &[&FieldPattern],
    field_map: &mut HashMap<String, u32>,
) -> usize {
    let mut mapped = 0;
    for (col, text) in row_texts(sheet, row, MAP_SCAN_COLS) {
        let normalized = normalize_header(&text);
        let hit = fields
            .iter()
            .find(|f| !field_map.contains_key(&f.name) && f.matches(&normalized));
        if let Some(field) = hit {
            debug!(row, col, field = %field.name, header = %normalized, "column mapped");
            field_map.insert(field.name.clone(), col);
            mapped += 1;
        }
    }
    mapped
}

fn missing_required(fields: &[FieldPattern], field_map: &HashMap<String, u32>) -> Vec<String> {
    let mut missing: Vec<String> = fields
        .iter()
        .filter(|f| f.required && !field_map.contains_key(&f.name))
        .map(|f| f.name.clone())
        .collect();
    missing.sort();
    missing
}

/// Currency written into the first data rows instead of its own header.
/// Price and amount headers sitting over a currency cell move one right.
fn currency_data_row_fallback<S: Sheet + ?Sized>(
    sheet: &S,
    header_row: u32,
    currency: &FieldPattern,
    field_map: &mut HashMap<String, u32>,
) {
    for row in header_row + 1..=header_row + 4 {
        let mut found = false;
        for (col, text) in row_texts(sheet, row, MAP_SCAN_COLS) {
            if !currency.matches(&text) {
                continue;
            }
            for shifted in ["price", "amount"] {
                if let Some(mapped) = field_map.get_mut(shifted)
                    && *mapped == col
                {
                    *mapped = col + 1;
                    debug!(field = shifted, from = col, to = col + 1, "shifted past currency cell");
                }
            }
            field_map.entry(currency.name.clone()).or_insert(col);
            found = true;
        }
        if found {
            debug!(row, "currency taken from data row");
            break;
        }
    }
}

pub fn map_columns<S: Sheet + ?Sized>(
    sheet: &S,
    header_row: u32,
    sheet_type: SheetType,
    config: &AppConfig,
) -> Result<ColumnMapping, ProcessingError> {
    let fields = config.columns(sheet_type);
    let all: Vec<&FieldPattern> = fields.iter().collect();

    let mut field_map = HashMap::new();
    scan_row_for_fields(sheet, header_row, &all, &mut field_map);

    let mut effective_header_row = header_row;
    if !missing_required(fields, &field_map).is_empty() {
        let sub_row = header_row + 1;
        let sub_cells = row_texts(sheet, sub_row, MAP_SCAN_COLS);
        if count_numeric(&sub_cells) < DATA_LIKE_THRESHOLD {
            let remaining: Vec<&FieldPattern> = fields
                .iter()
                .filter(|f| !field_map.contains_key(&f.name))
                .collect();
            if scan_row_for_fields(sheet, sub_row, &remaining, &mut field_map) > 0 {
                effective_header_row = sub_row;
                debug!(sub_row, "sub-header row supplied fields");
            }
        }
    }

    if sheet_type == SheetType::Invoice
        && let Some(currency) = fields.iter().find(|f| f.field_type == FieldType::Currency)
        && !field_map.contains_key(&currency.name)
    {
        currency_data_row_fallback(sheet, header_row, currency, &mut field_map);
    }

    let missing = missing_required(fields, &field_map);
    if !missing.is_empty() {
        return Err(ProcessingError::RequiredColumnsMissing {
            sheet: sheet_type,
            fields: missing,
        });
    }

    info!(
        sheet = %sheet_type,
        mapped = field_map.len(),
        header_row,
        effective_header_row,
        "columns mapped"
    );
    Ok(ColumnMapping {
        sheet_type,
        field_map,
        header_row,
        effective_header_row,
    })
}
