// src/extract/invoice.rs

use rust_decimal::Decimal;
use tracing::{debug, info, info_span};

use super::cells::{
    NumericCell, cell_text, clean_invoice_number, contains_footer_keyword, detect_cell_precision,
    is_placeholder, read_numeric, round_half_up, row_has_stop_keyword,
};
use super::{ColumnMapping, InvoiceItem};
use crate::error::ProcessingError;
use crate::merge::MergeSnapshot;
use crate::sheet::Sheet;

const PRICE_DECIMALS: u32 = 5;
const AMOUNT_DECIMALS: u32 = 2;

pub(super) fn required_col(mapping: &ColumnMapping, field: &str) -> Result<u32, ProcessingError> {
    mapping
        .col(field)
        .ok_or_else(|| ProcessingError::RequiredColumnsMissing {
            sheet: mapping.sheet_type,
            fields: vec![field.to_string()],
        })
}

/// Text of a cell, reading through to the anchor of a merged range.
fn read_string<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    col: u32,
) -> Option<String> {
    let text = cell_text(merges.anchor_value(sheet, row, col));
    (!text.is_empty()).then_some(text)
}

fn require_string<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    col: u32,
    field: &str,
) -> Result<String, ProcessingError> {
    match read_string(sheet, merges, row, col) {
        Some(text) if !is_placeholder(&text) => Ok(text),
        _ => Err(ProcessingError::EmptyRequiredField {
            row,
            field: field.to_string(),
        }),
    }
}

fn read_optional<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    col: Option<u32>,
) -> Option<String> {
    read_string(sheet, merges, row, col?).filter(|text| !is_placeholder(text))
}

/// Brand type merged sideways with brand takes the anchor text, or the
/// brand itself when the anchor is blank.
fn read_brand_type<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    col: u32,
    brand: &str,
) -> Result<String, ProcessingError> {
    if merges.is_continuation(row, col) {
        let anchor = cell_text(merges.anchor_value(sheet, row, col));
        return Ok(if anchor.is_empty() { brand.to_string() } else { anchor });
    }
    let text = cell_text(sheet.value(row, col));
    if text.is_empty() || is_placeholder(&text) {
        return Err(ProcessingError::EmptyRequiredField {
            row,
            field: "brand_type".to_string(),
        });
    }
    Ok(text)
}

/// A numeric field. Merged continuation cells count as empty; `decimals`
/// of `None` takes the precision from the cell's number format.
fn read_number<S: Sheet + ?Sized>(
    sheet: &S,
    merges: &MergeSnapshot,
    row: u32,
    col: u32,
    field: &str,
    decimals: Option<u32>,
) -> Result<Decimal, ProcessingError> {
    let empty = || ProcessingError::EmptyRequiredField {
        row,
        field: field.to_string(),
    };
    if merges.is_continuation(row, col) {
        return Err(empty());
    }
    let value = match read_numeric(sheet.value(row, col)) {
        NumericCell::Value(v) => v,
        NumericCell::Empty => return Err(empty()),
        NumericCell::Invalid(raw) => {
            return Err(ProcessingError::InvalidNumericValue {
                row,
                field: field.to_string(),
                value: raw,
            });
        }
    };
    Ok(match decimals {
        Some(dp) => round_half_up(value, dp),
        None => round_half_up(value, detect_cell_precision(sheet.number_format(row, col))),
    })
}

/// Walks the invoice table below the header until a stop condition.
/// `file_inv_no` is the header-area invoice number, used for rows without
/// their own.
pub fn extract_invoice_items<S: Sheet + ?Sized>(
    sheet: &S,
    mapping: &ColumnMapping,
    merges: &MergeSnapshot,
    file_inv_no: Option<&str>,
) -> Result<Vec<InvoiceItem>, ProcessingError> {
    let c_part = required_col(mapping, "part_no")?;
    let c_po = required_col(mapping, "po_no")?;
    let c_qty = required_col(mapping, "qty")?;
    let c_price = required_col(mapping, "price")?;
    let c_amount = required_col(mapping, "amount")?;
    let c_currency = required_col(mapping, "currency")?;
    let c_coo = required_col(mapping, "coo")?;
    let c_brand = required_col(mapping, "brand")?;
    let c_brand_type = required_col(mapping, "brand_type")?;
    let c_model = required_col(mapping, "model")?;
    let c_cod = mapping.col("cod");
    let c_inv = mapping.col("inv_no");
    let c_serial = mapping.col("serial");

    let start_row = mapping.effective_header_row + 1;
    let mut items = Vec::new();

    for row in start_row..=sheet.max_row() {
        let _span = info_span!("invoice_row", row).entered();

        let part_no = read_string(sheet, merges, row, c_part);
        if row_has_stop_keyword(sheet, row) {
            debug!("stop keyword");
            break;
        }
        if let Some(part) = &part_no
            && (part.to_lowercase().contains("total") || contains_footer_keyword(part))
        {
            debug!(part = %part, "footer row");
            break;
        }

        if part_no.is_none() && sheet.value(row, c_qty).is_blank() {
            if items.is_empty() {
                continue;
            }
            debug!("blank row after data");
            break;
        }
        if part_no
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains("part no"))
        {
            debug!("header continuation row skipped");
            continue;
        }

        let part_no = require_string(sheet, merges, row, c_part, "part_no")?;
        let po_no = require_string(sheet, merges, row, c_po, "po_no")?;
        let currency = require_string(sheet, merges, row, c_currency, "currency")?;

        // Destination country, when given, replaces origin.
        let cod = read_optional(sheet, merges, row, c_cod);
        let coo = match (&cod, read_optional(sheet, merges, row, Some(c_coo))) {
            (Some(dest), _) => dest.clone(),
            (None, Some(origin)) => origin,
            (None, None) => {
                return Err(ProcessingError::EmptyRequiredField {
                    row,
                    field: "coo".to_string(),
                });
            }
        };

        let brand = require_string(sheet, merges, row, c_brand, "brand")?;
        let brand_type = read_brand_type(sheet, merges, row, c_brand_type, &brand)?;
        let model = require_string(sheet, merges, row, c_model, "model")?;
        let serial = read_optional(sheet, merges, row, c_serial);

        let inv_no = read_optional(sheet, merges, row, c_inv)
            .or_else(|| file_inv_no.map(str::to_string))
            .map(|raw| clean_invoice_number(&raw));

        let qty = read_number(sheet, merges, row, c_qty, "qty", None)?;
        let price = read_number(sheet, merges, row, c_price, "price", Some(PRICE_DECIMALS))?;
        let amount = read_number(sheet, merges, row, c_amount, "amount", Some(AMOUNT_DECIMALS))?;

        items.push(InvoiceItem {
            part_no,
            po_no,
            qty,
            price,
            amount,
            currency,
            coo,
            cod,
            brand,
            brand_type,
            model,
            inv_no,
            serial,
        });
    }

    info!(sheet = sheet.name(), items = items.len(), start_row, "invoice items extracted");
    Ok(items)
}
