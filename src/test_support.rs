// src/test_support.rs
//
// Shared fixtures for unit tests.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::sheet::{CellValue, GridSheet};

pub const SHIPPED_CONFIG: &str = include_str!("../config/autoconvert.toml");

pub fn d(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap()
}

pub fn config() -> AppConfig {
    AppConfig::from_toml_str(SHIPPED_CONFIG, "autoconvert.toml").unwrap()
}

/// "" is an empty cell, anything that parses as f64 is a number, the rest is text.
pub fn cell(text: &str) -> CellValue {
    if text.is_empty() {
        CellValue::Empty
    } else if let Ok(n) = text.parse::<f64>() {
        CellValue::Number(n)
    } else {
        CellValue::Text(text.to_string())
    }
}

/// Writes `cells` into `row` starting at column 1.
pub fn put_row(sheet: &mut GridSheet, row: u32, cells: &[&str]) {
    for (i, text) in cells.iter().enumerate() {
        sheet.set_value(row, i as u32 + 1, cell(text));
    }
}

pub fn sheet(name: &str, rows: &[(u32, &[&str])]) -> GridSheet {
    let mut sheet = GridSheet::new(name);
    for (row, cells) in rows {
        put_row(&mut sheet, *row, cells);
    }
    sheet
}

pub const INVOICE_ROWS: &[(u32, &[&str])] = &[
    (3, &["Invoice No.: INV#2024-118"]),
    (
        9,
        &[
            "Part No", "P.O. No", "Qty", "Unit Price", "Amount", "Currency",
            "Country of Origin", "Brand", "品牌类型", "Model",
        ],
    ),
    (10, &["A", "4500-1", "3", "1.5", "4.5", "usd", "China", "ACME", "境外品牌", "M1"]),
    (11, &["B", "4501", "7", "2", "14", "USD", "JAPAN", "ACME", "境外品牌", "M2"]),
];

pub const PACKING_ROWS: &[(u32, &[&str])] = &[
    (9, &["Part No", "Qty", "N.W.", "G.W."]),
    (10, &["A", "3", "0.35", "0.5"]),
    (11, &["B", "7", "0.65", "0.8"]),
    (12, &["TOTAL", "10", "1", "1.3"]),
    (13, &["共2托"]),
];

/// Saves an `.xlsx` with one worksheet per entry, cells typed as `cell` types them.
pub fn write_xlsx(path: &std::path::Path, sheets: &[(&str, &[(u32, &[&str])])]) {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (row, cells) in rows.iter() {
            for (i, text) in cells.iter().enumerate() {
                let (r, c) = (row - 1, i as u16);
                match cell(text) {
                    CellValue::Number(n) => worksheet.write_number(r, c, n).unwrap(),
                    CellValue::Text(t) => worksheet.write_string(r, c, t).unwrap(),
                    _ => continue,
                };
            }
        }
    }
    workbook.save(path).unwrap();
}

pub const TEMPLATE_TITLE: &str = "进口货物报关明细";

/// Saves a customs template: a merged title over A1:F1, a dated row 2 and
/// column captions in row 4.
pub fn write_output_template(path: &std::path::Path) {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("工作表1").unwrap();
    worksheet
        .merge_range(0, 0, 0, 5, TEMPLATE_TITLE, &rust_xlsxwriter::Format::new())
        .unwrap();
    worksheet.write_string(1, 0, "版本").unwrap();
    let date = rust_xlsxwriter::Format::new().set_num_format("0.0");
    worksheet.write_number_with_format(1, 1, 2.0, &date).unwrap();
    let captions = ["企业料号", "采购订单号", "征免方式", "币制", "数量", "单价", "总价", "原产国"];
    for (i, caption) in captions.iter().enumerate() {
        worksheet.write_string(3, i as u16, *caption).unwrap();
    }
    worksheet.write_string(3, 39, "型号").unwrap();
    workbook.save(path).unwrap();
}

/// Shipped config whose output template is written into `dir`.
pub fn config_with_template(dir: &std::path::Path) -> AppConfig {
    let template = dir.join("output_template.xlsx");
    write_output_template(&template);
    AppConfig {
        output_template_path: template,
        ..config()
    }
}
