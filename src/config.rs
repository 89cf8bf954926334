// src/config.rs

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::{fs, io};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::extract::SheetType;

const INVOICE_FIELDS: [&str; 14] = [
    "part_no",
    "po_no",
    "qty",
    "price",
    "amount",
    "currency",
    "coo",
    "cod",
    "brand",
    "brand_type",
    "model",
    "weight",
    "inv_no",
    "serial",
];

const PACKING_FIELDS: [&str; 6] = ["part_no", "po_no", "qty", "nw", "gw", "pack"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("cannot read config {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("invalid TOML in {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid regex in '{context}': '{pattern}': {source}")]
    InvalidPattern {
        context: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("missing field '{field}' in [[{section}]]")]
    MissingField { section: String, field: String },

    #[error("unknown or repeated field '{field}' in [[{section}]]")]
    UnexpectedField { section: String, field: String },

    #[error("duplicate key '{key}' in [{table}] after normalization")]
    DuplicateLookupKey { table: String, key: String },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    header: HeaderSection,
    sheets: SheetSection,
    invoice_columns: Vec<RawField>,
    packing_columns: Vec<RawField>,
    inv_no_cell: RawInvNoCell,
    #[serde(default)]
    output: OutputSection,
    #[serde(default)]
    currency_lookup: BTreeMap<String, String>,
    #[serde(default)]
    country_lookup: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HeaderSection {
    #[serde(default = "default_invoice_min_cells")]
    invoice_min_cells: usize,
    #[serde(default = "default_packing_min_cells")]
    packing_min_cells: usize,
}

impl Default for HeaderSection {
    fn default() -> Self {
        Self {
            invoice_min_cells: default_invoice_min_cells(),
            packing_min_cells: default_packing_min_cells(),
        }
    }
}

fn default_invoice_min_cells() -> usize {
    7
}

fn default_packing_min_cells() -> usize {
    4
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    /// Relative paths are taken from the config file's directory.
    #[serde(default = "default_template")]
    template: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            template: default_template(),
        }
    }
}

fn default_template() -> PathBuf {
    PathBuf::from("output_template.xlsx")
}

#[derive(Debug, Deserialize)]
struct SheetSection {
    invoice: Vec<String>,
    packing: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    required: bool,
    patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawInvNoCell {
    patterns: Vec<String>,
    #[serde(default)]
    label_patterns: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Numeric,
    Currency,
}

/// How one semantic column is recognized in a header row.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub name: String,
    pub patterns: Vec<Regex>,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldPattern {
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

/// Patterns for finding an invoice number outside the data table.
#[derive(Debug, Clone)]
pub struct InvNoCellConfig {
    /// Each pattern's first capture group is the number itself.
    pub patterns: Vec<Regex>,
    /// A cell that only labels the number; the value sits next to or below it.
    pub label_patterns: Vec<Regex>,
    pub exclude_patterns: Vec<Regex>,
}

impl InvNoCellConfig {
    pub fn is_excluded(&self, candidate: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(candidate))
    }
}

/// Everything a conversion needs, compiled once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub invoice_min_cells: usize,
    pub packing_min_cells: usize,
    pub invoice_sheet_patterns: Vec<Regex>,
    pub packing_sheet_patterns: Vec<Regex>,
    pub invoice_columns: Vec<FieldPattern>,
    pub packing_columns: Vec<FieldPattern>,
    pub inv_no_cell: InvNoCellConfig,
    pub currency_lookup: HashMap<String, String>,
    pub country_lookup: HashMap<String, String>,
    /// Workbook whose `工作表1` header block every output starts from.
    pub output_template_path: PathBuf,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound {
                path: display.clone(),
            },
            _ => ConfigError::Io {
                path: display.clone(),
                source: e,
            },
        })?;
        let mut config = Self::from_toml_str(&content, &display)?;
        if config.output_template_path.is_relative() {
            let dir = path.parent().unwrap_or(Path::new("."));
            config.output_template_path = dir.join(&config.output_template_path);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;

        let config = AppConfig {
            invoice_min_cells: raw.header.invoice_min_cells,
            packing_min_cells: raw.header.packing_min_cells,
            invoice_sheet_patterns: compile_all(&raw.sheets.invoice, "sheets.invoice")?,
            packing_sheet_patterns: compile_all(&raw.sheets.packing, "sheets.packing")?,
            invoice_columns: build_fields(raw.invoice_columns, &INVOICE_FIELDS, "invoice_columns")?,
            packing_columns: build_fields(raw.packing_columns, &PACKING_FIELDS, "packing_columns")?,
            inv_no_cell: InvNoCellConfig {
                patterns: compile_all(&raw.inv_no_cell.patterns, "inv_no_cell.patterns")?,
                label_patterns: compile_all(
                    &raw.inv_no_cell.label_patterns,
                    "inv_no_cell.label_patterns",
                )?,
                exclude_patterns: compile_all(
                    &raw.inv_no_cell.exclude_patterns,
                    "inv_no_cell.exclude_patterns",
                )?,
            },
            currency_lookup: build_lookup(raw.currency_lookup, "currency_lookup")?,
            country_lookup: build_lookup(raw.country_lookup, "country_lookup")?,
            output_template_path: raw.output.template,
        };

        debug!(
            origin,
            invoice_fields = config.invoice_columns.len(),
            packing_fields = config.packing_columns.len(),
            currencies = config.currency_lookup.len(),
            countries = config.country_lookup.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn columns(&self, sheet: SheetType) -> &[FieldPattern] {
        match sheet {
            SheetType::Invoice => &self.invoice_columns,
            SheetType::Packing => &self.packing_columns,
        }
    }

    pub fn min_header_cells(&self, sheet: SheetType) -> usize {
        match sheet {
            SheetType::Invoice => self.invoice_min_cells,
            SheetType::Packing => self.packing_min_cells,
        }
    }

    pub fn field(&self, sheet: SheetType, name: &str) -> Option<&FieldPattern> {
        self.columns(sheet).iter().find(|f| f.name == name)
    }
}

/// Lookup key form: trimmed, uppercased, ", " collapsed to ",".
pub fn normalize_lookup_key(value: &str) -> String {
    value.trim().to_uppercase().replace(", ", ",")
}

fn compile(pattern: &str, context: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            context: context.to_string(),
            pattern: pattern.to_string(),
            source: e,
        })
}

fn compile_all(patterns: &[String], context: &str) -> Result<Vec<Regex>, ConfigError> {
    patterns.iter().map(|p| compile(p, context)).collect()
}

fn build_fields(
    raw: Vec<RawField>,
    expected: &[&str],
    section: &str,
) -> Result<Vec<FieldPattern>, ConfigError> {
    let mut fields: Vec<FieldPattern> = Vec::with_capacity(raw.len());
    for entry in raw {
        let known = expected.contains(&entry.name.as_str());
        if !known || fields.iter().any(|f| f.name == entry.name) {
            return Err(ConfigError::UnexpectedField {
                section: section.to_string(),
                field: entry.name,
            });
        }
        let context = format!("{section}.{}", entry.name);
        fields.push(FieldPattern {
            patterns: compile_all(&entry.patterns, &context)?,
            name: entry.name,
            field_type: entry.field_type,
            required: entry.required,
        });
    }

    if let Some(missing) = expected.iter().find(|name| !fields.iter().any(|f| f.name == **name)) {
        return Err(ConfigError::MissingField {
            section: section.to_string(),
            field: missing.to_string(),
        });
    }
    Ok(fields)
}

fn build_lookup(
    raw: BTreeMap<String, String>,
    table: &str,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut lookup = HashMap::with_capacity(raw.len());
    for (key, code) in raw {
        let normalized = normalize_lookup_key(&key);
        if lookup.insert(normalized.clone(), code.trim().to_string()).is_some() {
            return Err(ConfigError::DuplicateLookupKey {
                table: table.to_string(),
                key: normalized,
            });
        }
    }
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = include_str!("../config/autoconvert.toml");

    #[test]
    fn test_shipped_config_loads() {
        let config = AppConfig::from_toml_str(SHIPPED, "autoconvert.toml").unwrap();
        assert_eq!(config.invoice_columns.len(), 14);
        assert_eq!(config.packing_columns.len(), 6);
        assert_eq!(config.invoice_min_cells, 7);
        assert_eq!(config.currency_lookup.get("USD").map(String::as_str), Some("502"));
        assert_eq!(
            config.country_lookup.get("CHINA,MAINLAND").map(String::as_str),
            Some("142")
        );
    }

    #[test]
    fn test_patterns_are_case_insensitive() {
        let config = AppConfig::from_toml_str(SHIPPED, "autoconvert.toml").unwrap();
        let part = config.field(SheetType::Invoice, "part_no").unwrap();
        assert!(part.matches("PART NO."));
        assert!(part.matches("part no"));
        assert!(!part.matches("p.o. no"));
    }

    #[test]
    fn test_invalid_regex_names_context() {
        let broken = SHIPPED.replace("'^packing'", "'(unclosed'");
        let err = AppConfig::from_toml_str(&broken, "t.toml").unwrap_err();
        match err {
            ConfigError::InvalidPattern { context, pattern, .. } => {
                assert_eq!(context, "sheets.packing");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let renamed = SHIPPED.replace("name = \"serial\"", "name = \"serial_no\"");
        let err = AppConfig::from_toml_str(&renamed, "t.toml").unwrap_err();
        assert!(matches!(err, ConfigError::UnexpectedField { field, .. } if field == "serial_no"));
    }

    #[test]
    fn test_duplicate_normalized_lookup_key() {
        let dup = SHIPPED.replace("[currency_lookup]", "[currency_lookup]\n\" usd \" = \"999\"");
        let err = AppConfig::from_toml_str(&dup, "t.toml").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateLookupKey { key, .. } if key == "USD"));
    }

    #[test]
    fn test_header_defaults_apply() {
        let no_header = SHIPPED.replace(
            "[header]\ninvoice_min_cells = 7\npacking_min_cells = 4\n",
            "",
        );
        let config = AppConfig::from_toml_str(&no_header, "t.toml").unwrap();
        assert_eq!(config.invoice_min_cells, 7);
        assert_eq!(config.packing_min_cells, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_template_path_is_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoconvert.toml");
        fs::write(&path, SHIPPED).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.output_template_path, dir.path().join("output_template.xlsx"));

        let absolute = SHIPPED.replace(
            "template = \"output_template.xlsx\"",
            "template = \"/srv/templates/customs.xlsx\"",
        );
        let config = AppConfig::from_toml_str(&absolute, "t.toml").unwrap();
        assert_eq!(config.output_template_path, PathBuf::from("/srv/templates/customs.xlsx"));
    }

    #[test]
    fn test_normalize_lookup_key() {
        assert_eq!(normalize_lookup_key("  china, mainland "), "CHINA,MAINLAND");
    }
}
