// src/transform.rs

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{AppConfig, normalize_lookup_key};
use crate::error::Warning;
use crate::extract::InvoiceItem;

const PO_DELIMITERS: [char; 6] = ['-', '.', '/', ',', '(', ';'];

/// Replaces one field through a lookup table. Unknown values stay as they
/// are and each one yields a warning.
fn convert_field(
    items: &[InvoiceItem],
    table: &HashMap<String, String>,
    field: fn(&mut InvoiceItem) -> &mut String,
    unmatched: fn(String) -> Warning,
) -> (Vec<InvoiceItem>, Vec<Warning>) {
    let mut warnings = Vec::new();
    let converted = items
        .iter()
        .cloned()
        .map(|mut item| {
            let value = field(&mut item);
            match table.get(&normalize_lookup_key(value)) {
                Some(code) => {
                    debug!(from = %value, to = %code, "code converted");
                    *value = code.clone();
                }
                None => {
                    let warning = unmatched(value.clone());
                    warn!(code = warning.code(), "{warning}");
                    warnings.push(warning);
                }
            }
            item
        })
        .collect();
    (converted, warnings)
}

pub fn convert_currency(items: &[InvoiceItem], config: &AppConfig) -> (Vec<InvoiceItem>, Vec<Warning>) {
    convert_field(
        items,
        &config.currency_lookup,
        |item| &mut item.currency,
        |value| Warning::UnmatchedCurrency { value },
    )
}

pub fn convert_country(items: &[InvoiceItem], config: &AppConfig) -> (Vec<InvoiceItem>, Vec<Warning>) {
    convert_field(
        items,
        &config.country_lookup,
        |item| &mut item.coo,
        |value| Warning::UnmatchedCountry { value },
    )
}

/// Cuts an identifier at its first delimiter ("2250600556-2.1" →
/// "2250600556"). A leading delimiter leaves the value untouched.
pub fn clean_identifier(value: &str) -> &str {
    match value.find(PO_DELIMITERS) {
        Some(0) | None => value,
        Some(cut) => &value[..cut],
    }
}

pub fn clean_po_numbers(items: &[InvoiceItem]) -> Vec<InvoiceItem> {
    items
        .iter()
        .cloned()
        .map(|mut item| {
            let cleaned = clean_identifier(&item.po_no);
            if cleaned.len() != item.po_no.len() {
                debug!(from = %item.po_no, to = cleaned, "po number cleaned");
                item.po_no = cleaned.to_string();
            }
            item
        })
        .collect()
}
