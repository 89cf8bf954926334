// src/extract/mod.rs

pub mod cells;
pub mod header;
pub mod invoice;
pub mod invoice_no;
pub mod packing;
pub mod totals;

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SheetType {
    Invoice,
    Packing,
}

impl fmt::Display for SheetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetType::Invoice => f.write_str("Invoice"),
            SheetType::Packing => f.write_str("Packing"),
        }
    }
}

/// Where each semantic field lives on a sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub sheet_type: SheetType,
    pub field_map: HashMap<String, u32>,
    pub header_row: u32,
    /// `header_row + 1` when the field names were split across two rows.
    pub effective_header_row: u32,
}

impl ColumnMapping {
    pub fn col(&self, field: &str) -> Option<u32> {
        self.field_map.get(field).copied()
    }
}

/// One invoice line as read from the sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceItem {
    pub part_no: String,
    pub po_no: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub currency: String,
    pub coo: String,
    pub cod: Option<String>,
    pub brand: String,
    pub brand_type: String,
    pub model: String,
    pub inv_no: Option<String>,
    pub serial: Option<String>,
}

/// An invoice line with its share of the packing net weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocatedItem {
    #[serde(flatten)]
    pub item: InvoiceItem,
    pub allocated_weight: Decimal,
}

/// One packing-list row that carries weight or quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackingItem {
    pub part_no: String,
    pub qty: Decimal,
    pub nw: Decimal,
    /// False when the weight was zeroed because it belongs to an earlier row
    /// (merged cell, ditto mark, or implicit continuation).
    pub is_first_row_of_merge: bool,
    pub source_row: u32,
}

/// Totals read from the packing list's total row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackingTotals {
    pub total_nw: Decimal,
    pub total_nw_precision: u32,
    pub total_gw: Decimal,
    pub total_gw_precision: u32,
    pub total_packets: Option<u32>,
}
