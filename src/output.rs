// src/output.rs

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use tracing::{debug, info};

use crate::error::ProcessingError;
use crate::extract::{AllocatedItem, PackingTotals};
use crate::sheet::{CellValue, GridSheet, Sheet, open_workbook};

pub const SHEET_NAME: &str = "工作表1";

/// Template rows above the items; copied as they are.
const HEADER_ROWS: u32 = 4;
/// Zero-based row of the first item.
const FIRST_DATA_ROW: u32 = HEADER_ROWS;

// Zero-based template columns.
const COL_PART_NO: u16 = 0;
const COL_PO_NO: u16 = 1;
const COL_EXEMPTION: u16 = 2;
const COL_CURRENCY: u16 = 3;
const COL_QTY: u16 = 4;
const COL_PRICE: u16 = 5;
const COL_AMOUNT: u16 = 6;
const COL_COUNTRY: u16 = 7;
const COL_SERIAL: u16 = 11;
const COL_NET_WEIGHT: u16 = 12;
const COL_INV_NO: u16 = 13;
const COL_TOTAL_GW: u16 = 15;
const COL_DOMESTIC_DEST: u16 = 17;
const COL_DISTRICT: u16 = 18;
const COL_FINAL_DEST: u16 = 19;
const COL_PACKETS: u16 = 36;
const COL_BRAND: u16 = 37;
const COL_BRAND_TYPE: u16 = 38;
const COL_MODEL: u16 = 39;

/// Values every row carries regardless of input.
const FIXED_COLUMNS: [(u16, &str); 4] = [
    (COL_EXEMPTION, "3"),
    (COL_DOMESTIC_DEST, "32052"),
    (COL_DISTRICT, "320506"),
    (COL_FINAL_DEST, "142"),
];

/// Output file name for an input workbook: `<stem>_template.xlsx`.
pub fn output_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}_template.xlsx")
}

/// Number format showing exactly the decimals the value carries.
fn decimal_format(value: Decimal) -> Format {
    let places = value.scale() as usize;
    let pattern = if places == 0 {
        "0".to_string()
    } else {
        format!("0.{}", "0".repeat(places))
    };
    Format::new().set_num_format(pattern)
}

fn excel_number(value: Decimal) -> Result<f64, XlsxError> {
    value
        .to_f64()
        .ok_or_else(|| XlsxError::ParameterError(format!("{value} has no f64 form")))
}

fn write_decimal(sheet: &mut Worksheet, row: u32, col: u16, value: Decimal) -> Result<(), XlsxError> {
    sheet.write_number_with_format(row, col, excel_number(value)?, &decimal_format(value))?;
    Ok(())
}

fn write_item(sheet: &mut Worksheet, row: u32, line: &AllocatedItem) -> Result<(), XlsxError> {
    let item = &line.item;
    sheet.write_string(row, COL_PART_NO, &item.part_no)?;
    sheet.write_string(row, COL_PO_NO, &item.po_no)?;
    sheet.write_string(row, COL_CURRENCY, &item.currency)?;
    // Quantities always carry five places; General shows the digits that matter.
    sheet.write_number(row, COL_QTY, excel_number(item.qty)?)?;
    write_decimal(sheet, row, COL_PRICE, item.price)?;
    write_decimal(sheet, row, COL_AMOUNT, item.amount)?;
    sheet.write_string(row, COL_COUNTRY, &item.coo)?;
    if let Some(serial) = &item.serial {
        sheet.write_string(row, COL_SERIAL, serial)?;
    }
    write_decimal(sheet, row, COL_NET_WEIGHT, line.allocated_weight)?;
    if let Some(inv_no) = &item.inv_no {
        sheet.write_string(row, COL_INV_NO, inv_no)?;
    }
    sheet.write_string(row, COL_BRAND, &item.brand)?;
    sheet.write_string(row, COL_BRAND_TYPE, &item.brand_type)?;
    sheet.write_string(row, COL_MODEL, &item.model)?;
    for (col, value) in FIXED_COLUMNS {
        sheet.write_string(row, col, value)?;
    }
    Ok(())
}

/// Reads the template's `工作表1`.
fn load_template(path: &Path) -> Result<GridSheet, ProcessingError> {
    let failed = |reason: String| ProcessingError::TemplateLoadFailed {
        path: path.display().to_string(),
        reason,
    };
    let mut book = open_workbook(path).map_err(|e| failed(e.to_string()))?;
    let names = book.sheet_names();
    if !names.iter().any(|n| n == SHEET_NAME) {
        return Err(failed(format!("no sheet '{SHEET_NAME}' (sheets: {names:?})")));
    }
    let template = book.load_sheet(SHEET_NAME).map_err(|e| failed(e.to_string()))?;
    debug!(path = %path.display(), cols = template.max_col(), "template loaded");
    Ok(template)
}

/// Re-emits the template's header rows, merges included.
fn copy_header(sheet: &mut Worksheet, template: &GridSheet) -> Result<(), XlsxError> {
    let blank = Format::new();
    for m in template.merged_ranges() {
        if m.max_row > HEADER_ROWS {
            continue;
        }
        sheet.merge_range(
            m.min_row - 1,
            (m.min_col - 1) as u16,
            m.max_row - 1,
            (m.max_col - 1) as u16,
            "",
            &blank,
        )?;
    }
    for row in 1..=HEADER_ROWS.min(template.max_row()) {
        for col in 1..=template.max_col() {
            let (r, c) = (row - 1, (col - 1) as u16);
            match template.value(row, col) {
                CellValue::Empty => {}
                CellValue::Text(text) => {
                    sheet.write_string(r, c, text)?;
                }
                CellValue::Number(n) => {
                    let format = Format::new().set_num_format(template.number_format(row, col));
                    sheet.write_number_with_format(r, c, *n, &format)?;
                }
                CellValue::Bool(b) => {
                    sheet.write_boolean(r, c, *b)?;
                }
            }
        }
    }
    Ok(())
}

fn build_workbook(
    template: &GridSheet,
    items: &[AllocatedItem],
    totals: &PackingTotals,
) -> Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;
    copy_header(sheet, template)?;

    for (i, line) in items.iter().enumerate() {
        let row = FIRST_DATA_ROW + i as u32;
        write_item(sheet, row, line)?;
        if i == 0 {
            write_decimal(sheet, row, COL_TOTAL_GW, totals.total_gw)?;
            if let Some(packets) = totals.total_packets {
                sheet.write_number(row, COL_PACKETS, f64::from(packets))?;
            }
        }
    }
    Ok(workbook)
}

fn write_failed(path: &Path, e: XlsxError) -> ProcessingError {
    ProcessingError::OutputWriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Fills a copy of the customs template with one converted file.
pub fn write_template(
    template_path: &Path,
    items: &[AllocatedItem],
    totals: &PackingTotals,
    path: &Path,
) -> Result<(), ProcessingError> {
    let template = load_template(template_path)?;
    let mut workbook =
        build_workbook(&template, items, totals).map_err(|e| write_failed(path, e))?;
    workbook.save(path).map_err(|e| write_failed(path, e))?;
    info!(path = %path.display(), rows = items.len(), "template written");
    Ok(())
}
