// src/extract/cells.rs
//
// Cell-level reading rules shared by both extractors.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::sheet::{CellValue, Sheet};

/// Marks meaning "same as the row above".
pub const DITTO_MARKS: [&str; 4] = ["\"", "\u{3003}", "\u{201c}", "\u{201d}"];

/// Signature-block keywords that end the invoice table.
pub const FOOTER_KEYWORDS: [&str; 4] = ["报关行", "有限公司", "口岸关别", "进境口岸"];

const STOP_KEYWORDS: [&str; 4] = ["total", "合计", "总计", "小计"];

/// Stop keywords are looked for in columns 1..=STOP_SCAN_COLS.
pub const STOP_SCAN_COLS: u32 = 10;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[/\\*\-—]+$").expect("placeholder regex"));

static UNIT_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:KGS|KG|LBS|LB|PCS|EA|件|个|G)\s*$").expect("unit suffix regex")
});

static HEADER_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\n\t]+").expect("header whitespace regex"));

static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("multi space regex"));

static INVOICE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:INV\s*#\s*|NO\.\s*)").expect("invoice prefix regex")
});

/// Half-up rounding padded to exactly `dp` places (0.125 → 0.13, 2.5 → 3).
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded
}

/// Decimal places a number format displays. General (or no format) gives 5;
/// packing weights then narrow that to the visible digits.
pub fn detect_cell_precision(format: &str) -> u32 {
    let format = format.trim();
    if format.is_empty() || format.eq_ignore_ascii_case("general") {
        return 5;
    }
    let cleaned = format.trim_end_matches(['_', ')', ' ']);
    match cleaned.rfind('.') {
        Some(dot) => {
            let digits = cleaned[dot + 1..].chars().filter(|c| matches!(c, '0' | '#')).count();
            digits.min(5) as u32
        }
        None => 0,
    }
}

/// Decimals actually shown once the value is rounded to 5 and trailing
/// zeros dropped (2.50000 → 1).
pub fn visible_precision(value: Decimal) -> u32 {
    round_half_up(value, 5).normalize().scale()
}

/// Rounds using the format's precision, or the visible precision for
/// General. Returns the value and the precision used.
pub fn round_to_format(value: Decimal, format: &str) -> (Decimal, u32) {
    let precision = match detect_cell_precision(format) {
        5 if is_general(format) => visible_precision(value),
        p => p,
    };
    (round_half_up(value, precision), precision)
}

fn is_general(format: &str) -> bool {
    let format = format.trim();
    format.is_empty() || format.eq_ignore_ascii_case("general")
}

pub fn decimal_from_f64(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&n.to_string()).ok()
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Result of reading a cell as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericCell {
    Empty,
    Value(Decimal),
    Invalid(String),
}

/// Numbers as-is; text with unit suffixes stripped first.
pub fn read_numeric(value: &CellValue) -> NumericCell {
    match value {
        CellValue::Empty => NumericCell::Empty,
        CellValue::Number(n) => match decimal_from_f64(*n) {
            Some(d) => NumericCell::Value(d),
            None => NumericCell::Invalid(n.to_string()),
        },
        CellValue::Text(s) if s.trim().is_empty() => NumericCell::Empty,
        CellValue::Text(s) => match parse_decimal(&strip_unit_suffix(s)) {
            Some(d) => NumericCell::Value(d),
            None => NumericCell::Invalid(s.clone()),
        },
        CellValue::Bool(b) => NumericCell::Invalid(b.to_string()),
    }
}

pub fn strip_unit_suffix(text: &str) -> String {
    UNIT_SUFFIX_RE.replace(text.trim(), "").trim().to_string()
}

/// Trimmed text of any cell; integral numbers render without ".0".
pub fn cell_text(value: &CellValue) -> String {
    value.display().trim().to_string()
}

/// `/`, `-`, `*`, `\`, `—` runs and `N/A`. `无` is a real value.
pub fn is_placeholder(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("n/a") || PLACEHOLDER_RE.is_match(text)
}

pub fn is_ditto(value: &CellValue) -> bool {
    value
        .as_text()
        .is_some_and(|s| DITTO_MARKS.contains(&s.trim()))
}

/// Lowercased with tabs/newlines as spaces and space runs collapsed.
pub fn normalize_header(text: &str) -> String {
    let collapsed = HEADER_SPACE_RE.replace_all(text, " ");
    MULTI_SPACE_RE
        .replace_all(&collapsed, " ")
        .trim()
        .to_lowercase()
}

pub fn contains_stop_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    STOP_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn contains_footer_keyword(text: &str) -> bool {
    FOOTER_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Any text cell in the leading columns of `row` carries a stop keyword.
pub fn row_has_stop_keyword<S: Sheet + ?Sized>(sheet: &S, row: u32) -> bool {
    (1..=STOP_SCAN_COLS).any(|col| {
        sheet
            .value(row, col)
            .as_text()
            .is_some_and(contains_stop_keyword)
    })
}

/// Drops one leading `INV#` or `NO.` from an invoice number.
pub fn clean_invoice_number(raw: &str) -> String {
    INVOICE_PREFIX_RE.replace(raw.trim(), "").trim().to_string()
}

/// Plain number, or an alphanumeric/dash code with at least one digit.
pub fn is_numeric_looking(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let plain_number = {
        let mut parts = text.splitn(2, '.');
        let int_part = parts.next().unwrap_or_default();
        let frac_part = parts.next().unwrap_or_default();
        !int_part.is_empty()
            && int_part.chars().all(|c| c.is_ascii_digit())
            && frac_part.chars().all(|c| c.is_ascii_digit())
    };
    let code = text.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && text.chars().any(|c| c.is_ascii_digit());
    plain_number || code
}
