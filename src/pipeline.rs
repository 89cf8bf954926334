// src/pipeline.rs
//
// One input workbook from open to written template.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, info_span};

use crate::allocate::allocate_weights;
use crate::config::AppConfig;
use crate::error::{ProcessingError, Warning};
use crate::extract::header::{detect_header_row, map_columns};
use crate::extract::invoice::extract_invoice_items;
use crate::extract::invoice_no::resolve_from_header;
use crate::extract::packing::{extract_packing_items, validate_merged_weights};
use crate::extract::totals::{detect_total_row, extract_totals};
use crate::extract::{AllocatedItem, ColumnMapping, PackingTotals, SheetType};
use crate::merge::MergeSnapshot;
use crate::output::{output_file_name, write_template};
use crate::sheet::{Sheet, open_workbook};
use crate::transform::{clean_po_numbers, convert_country, convert_currency};

/// Names of the two sheets a workbook is converted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPair {
    pub invoice: String,
    pub packing: String,
}

/// First sheet whose trimmed name matches each pattern list. A missing
/// invoice sheet is reported before a missing packing sheet.
pub fn detect_sheets(names: &[String], config: &AppConfig) -> Result<SheetPair, ProcessingError> {
    let find = |patterns: &[regex::Regex]| {
        names
            .iter()
            .find(|name| patterns.iter().any(|p| p.is_match(name.trim())))
            .cloned()
    };
    let invoice = find(&config.invoice_sheet_patterns).ok_or_else(|| {
        ProcessingError::InvoiceSheetNotFound {
            sheets: names.to_vec(),
        }
    })?;
    let packing = find(&config.packing_sheet_patterns).ok_or_else(|| {
        ProcessingError::PackingSheetNotFound {
            sheets: names.to_vec(),
        }
    })?;
    debug!(invoice = %invoice, packing = %packing, "sheets identified");
    Ok(SheetPair { invoice, packing })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Success,
    Attention,
    Failed,
}

impl FileStatus {
    pub fn from_outcome(errors: &[ProcessingError], warnings: &[Warning]) -> Self {
        if !errors.is_empty() {
            FileStatus::Failed
        } else if !warnings.is_empty() {
            FileStatus::Attention
        } else {
            FileStatus::Success
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Success => f.write_str("SUCCESS"),
            FileStatus::Attention => f.write_str("ATTENTION"),
            FileStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// The converted content of one workbook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub items: Vec<AllocatedItem>,
    pub totals: PackingTotals,
    pub precision: u32,
    /// SHA-256 over the allocated lines; equal inputs give equal digests.
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    pub errors: Vec<ProcessingError>,
    pub warnings: Vec<Warning>,
    pub conversion: Option<Conversion>,
    pub output: Option<PathBuf>,
}

fn fingerprint(items: &[AllocatedItem], totals: &PackingTotals) -> String {
    let mut hasher = Sha256::new();
    for line in items {
        let item = &line.item;
        hasher.update(item.part_no.as_bytes());
        hasher.update(item.po_no.as_bytes());
        hasher.update(item.qty.to_string().as_bytes());
        hasher.update(item.amount.to_string().as_bytes());
        hasher.update(line.allocated_weight.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(totals.total_nw.to_string().as_bytes());
    hasher.update(totals.total_gw.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn locate_columns<S: Sheet + ?Sized>(
    sheet: &S,
    sheet_type: SheetType,
    config: &AppConfig,
) -> Result<ColumnMapping, ProcessingError> {
    let header_row = detect_header_row(sheet, sheet_type, config)?;
    map_columns(sheet, header_row, sheet_type, config)
}

/// Runs extraction, transformation and allocation over an invoice and a
/// packing sheet. Header and invoice-number problems of both sheets are
/// reported together; after that the first error stops the file.
pub fn convert_sheets<I, P>(
    invoice: &mut I,
    packing: &mut P,
    config: &AppConfig,
    warnings: &mut Vec<Warning>,
) -> Result<Conversion, Vec<ProcessingError>>
where
    I: Sheet + ?Sized,
    P: Sheet + ?Sized,
{
    let inv_merges = MergeSnapshot::capture(invoice);
    let pack_merges = MergeSnapshot::capture(packing);
    debug!(
        invoice_merges = inv_merges.range_count(),
        packing_merges = pack_merges.range_count(),
        "merged ranges captured"
    );
    let invoice = &*invoice;
    let packing = &*packing;

    let mut errors = Vec::new();
    let inv_map = locate_columns(invoice, SheetType::Invoice, config)
        .map_err(|e| errors.push(e))
        .ok();
    let pack_map = locate_columns(packing, SheetType::Packing, config)
        .map_err(|e| errors.push(e))
        .ok();

    let mut file_inv_no = None;
    if let Some(map) = &inv_map
        && map.col("inv_no").is_none()
    {
        file_inv_no = resolve_from_header(invoice, config);
        if file_inv_no.is_none() {
            errors.push(ProcessingError::InvoiceNumberNotFound);
        }
    }

    let (Some(inv_map), Some(pack_map)) = (inv_map, pack_map) else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let sheets = MappedSheets {
        invoice,
        packing,
        inv_map,
        pack_map,
        inv_merges,
        pack_merges,
    };
    sheets
        .convert(file_inv_no.as_deref(), config, warnings)
        .map_err(|e| vec![e])
}

/// Both sheets after a successful mapping phase.
struct MappedSheets<'a, I: ?Sized, P: ?Sized> {
    invoice: &'a I,
    packing: &'a P,
    inv_map: ColumnMapping,
    pack_map: ColumnMapping,
    inv_merges: MergeSnapshot,
    pack_merges: MergeSnapshot,
}

impl<I: Sheet + ?Sized, P: Sheet + ?Sized> MappedSheets<'_, I, P> {
    fn convert(
        &self,
        file_inv_no: Option<&str>,
        config: &AppConfig,
        warnings: &mut Vec<Warning>,
    ) -> Result<Conversion, ProcessingError> {
        let invoice_items =
            extract_invoice_items(self.invoice, &self.inv_map, &self.inv_merges, file_inv_no)?;
        let (packing_items, last_data_row) =
            extract_packing_items(self.packing, &self.pack_map, &self.pack_merges)?;
        validate_merged_weights(&packing_items, &self.pack_merges, &self.pack_map)?;
        let total_row =
            detect_total_row(self.packing, last_data_row, &self.pack_map, &self.pack_merges)?;
        let (totals, total_warnings) = extract_totals(self.packing, total_row, &self.pack_map)?;
        warnings.extend(total_warnings);

        let (items, currency_warnings) = convert_currency(&invoice_items, config);
        warnings.extend(currency_warnings);
        let (items, country_warnings) = convert_country(&items, config);
        warnings.extend(country_warnings);
        let items = clean_po_numbers(&items);

        let allocation = allocate_weights(&items, &packing_items, &totals)?;
        let fingerprint = fingerprint(&allocation.items, &totals);
        Ok(Conversion {
            items: allocation.items,
            totals,
            precision: allocation.precision,
            fingerprint,
        })
    }
}

fn convert_file(
    path: &Path,
    config: &AppConfig,
    warnings: &mut Vec<Warning>,
) -> Result<Conversion, Vec<ProcessingError>> {
    let mut book = open_workbook(path).map_err(|e| vec![e.into()])?;
    let names = book.sheet_names();
    let pair = detect_sheets(&names, config).map_err(|e| vec![e])?;
    let mut invoice = book.load_sheet(&pair.invoice).map_err(|e| vec![e.into()])?;
    let mut packing = book.load_sheet(&pair.packing).map_err(|e| vec![e.into()])?;
    convert_sheets(&mut invoice, &mut packing, config, warnings)
}

/// Converts one workbook and writes its template into `output_dir`.
pub fn process_file(path: &Path, config: &AppConfig, output_dir: &Path) -> FileResult {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let _span = info_span!("file", name = %filename).entered();

    let mut warnings = Vec::new();
    let (errors, conversion, output) = match convert_file(path, config, &mut warnings) {
        Err(errors) => (errors, None, None),
        Ok(conversion) => {
            let out_path = output_dir.join(output_file_name(path));
            match write_template(
                &config.output_template_path,
                &conversion.items,
                &conversion.totals,
                &out_path,
            ) {
                Ok(()) => (Vec::new(), Some(conversion), Some(out_path)),
                Err(e) => (vec![e], None, None),
            }
        }
    };

    let status = FileStatus::from_outcome(&errors, &warnings);
    if let Some(conversion) = &conversion {
        info!(
            %status,
            items = conversion.items.len(),
            fingerprint = %conversion.fingerprint,
            "file converted"
        );
    }
    FileResult {
        filename,
        status,
        errors,
        warnings,
        conversion,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{CellValue, GridSheet};
    use crate::test_support::{INVOICE_ROWS, PACKING_ROWS, config, d, sheet};

    fn invoice_sheet() -> GridSheet {
        sheet("Invoice", INVOICE_ROWS)
    }

    fn packing_sheet() -> GridSheet {
        sheet("Packing", PACKING_ROWS)
    }

    #[test]
    fn test_detect_sheets() {
        let names: Vec<String> = ["Summary", " INV 0412 ", "PK"].map(String::from).to_vec();
        let pair = detect_sheets(&names, &config()).unwrap();
        assert_eq!(pair.invoice, " INV 0412 ");
        assert_eq!(pair.packing, "PK");

        let names = vec!["Sheet1".to_string()];
        assert!(matches!(
            detect_sheets(&names, &config()),
            Err(ProcessingError::InvoiceSheetNotFound { .. })
        ));
        let names = vec!["Invoice".to_string()];
        assert!(matches!(
            detect_sheets(&names, &config()),
            Err(ProcessingError::PackingSheetNotFound { .. })
        ));
    }

    #[test]
    fn test_status_from_outcome() {
        let warning = Warning::PacketCountNotFound { total_row: 9 };
        assert_eq!(FileStatus::from_outcome(&[], &[]), FileStatus::Success);
        assert_eq!(FileStatus::from_outcome(&[], &[warning.clone()]), FileStatus::Attention);
        assert_eq!(
            FileStatus::from_outcome(&[ProcessingError::InvoiceNumberNotFound], &[warning]),
            FileStatus::Failed
        );
    }

    #[test]
    fn test_convert_sheets_end_to_end() {
        let mut warnings = Vec::new();
        let conversion =
            convert_sheets(&mut invoice_sheet(), &mut packing_sheet(), &config(), &mut warnings)
                .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(conversion.precision, 2);
        assert_eq!(conversion.totals.total_packets, Some(2));
        let first = &conversion.items[0];
        assert_eq!(first.item.currency, "502");
        assert_eq!(first.item.coo, "142");
        assert_eq!(first.item.po_no, "4500");
        assert_eq!(first.item.inv_no.as_deref(), Some("2024-118"));
        assert_eq!(first.allocated_weight, d("0.35"));
        assert_eq!(conversion.items[1].allocated_weight, d("0.65"));
        assert_eq!(conversion.fingerprint.len(), 64);
    }

    #[test]
    fn test_conversion_is_repeatable() {
        let mut warnings = Vec::new();
        let first =
            convert_sheets(&mut invoice_sheet(), &mut packing_sheet(), &config(), &mut warnings)
                .unwrap();
        let second =
            convert_sheets(&mut invoice_sheet(), &mut packing_sheet(), &config(), &mut warnings)
                .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mapping_errors_are_collected() {
        let mut invoice = sheet("Invoice", &[(9, &["Part No"])]);
        let mut packing = sheet("Packing", &[(2, &["nothing"])]);
        let errors =
            convert_sheets(&mut invoice, &mut packing, &config(), &mut Vec::new()).unwrap_err();
        let codes: Vec<&str> = errors.iter().map(ProcessingError::code).collect();
        assert_eq!(codes, ["ERR_014", "ERR_014"]);
    }

    #[test]
    fn test_missing_invoice_number_is_a_mapping_error() {
        let mut invoice = invoice_sheet();
        invoice.set_value(3, 1, CellValue::Empty);
        let errors =
            convert_sheets(&mut invoice, &mut packing_sheet(), &config(), &mut Vec::new())
                .unwrap_err();
        assert_eq!(errors, vec![ProcessingError::InvoiceNumberNotFound]);
    }

    #[test]
    fn test_unmatched_values_warn_but_convert() {
        let mut invoice = invoice_sheet();
        invoice.set_value(11, 7, "Atlantis");
        let mut packing = packing_sheet();
        packing.set_value(13, 1, CellValue::Empty);
        let mut warnings = Vec::new();
        let conversion =
            convert_sheets(&mut invoice, &mut packing, &config(), &mut warnings).unwrap();
        assert_eq!(conversion.items[1].item.coo, "Atlantis");
        let codes: Vec<&str> = warnings.iter().map(Warning::code).collect();
        assert_eq!(codes, ["ATT_002", "ATT_004"]);
    }

    #[test]
    fn test_allocation_failure_stops_the_file() {
        let mut packing = packing_sheet();
        packing.set_value(12, 3, 2.0);
        let errors =
            convert_sheets(&mut invoice_sheet(), &mut packing, &config(), &mut Vec::new())
                .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "ERR_047");
    }
}
