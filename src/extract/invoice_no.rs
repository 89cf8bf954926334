// src/extract/invoice_no.rs

use tracing::{debug, info};

use super::cells::clean_invoice_number;
use super::header::MAP_SCAN_COLS;
use crate::config::AppConfig;
use crate::sheet::Sheet;

/// Rows above the table that may carry the invoice number.
const HEADER_AREA_ROWS: u32 = 15;

fn cell_str<S: Sheet + ?Sized>(sheet: &S, row: u32, col: u32) -> Option<String> {
    let text = sheet.value(row, col).display().trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Looks for the invoice number in the header area when the table has no
/// invoice-number column. `None` means not found; that is not an error here.
pub fn resolve_from_header<S: Sheet + ?Sized>(sheet: &S, config: &AppConfig) -> Option<String> {
    let inv = &config.inv_no_cell;
    let area = || {
        (1..=HEADER_AREA_ROWS).flat_map(|row| (1..=MAP_SCAN_COLS).map(move |col| (row, col)))
    };

    // Pass 1: "INVOICE NO: 12345" in one cell.
    for (row, col) in area() {
        let Some(text) = cell_str(sheet, row, col) else {
            continue;
        };
        for pattern in &inv.patterns {
            let Some(found) = pattern
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
            else {
                continue;
            };
            if inv.is_excluded(&found) {
                debug!(row, col, candidate = %found, "excluded invoice number candidate");
                continue;
            }
            let cleaned = clean_invoice_number(&found);
            info!(row, col, inv_no = %cleaned, "invoice number from header cell");
            return Some(cleaned);
        }
    }

    // Pass 2: a label cell with the value to its right or below.
    for (row, col) in area() {
        let Some(text) = cell_str(sheet, row, col) else {
            continue;
        };
        if !inv.label_patterns.iter().any(|p| p.is_match(&text)) {
            continue;
        }
        let neighbours = (1..=3)
            .map(|offset| (row, col + offset))
            .chain([1, 2].map(|offset| (row + offset, col)));
        for (r, c) in neighbours {
            if let Some(candidate) = cell_str(sheet, r, c)
                && !inv.is_excluded(&candidate)
            {
                let cleaned = clean_invoice_number(&candidate);
                info!(label_row = row, label_col = col, row = r, col = c, inv_no = %cleaned, "invoice number next to label");
                return Some(cleaned);
            }
        }
    }

    debug!("no invoice number in header area");
    None
}
