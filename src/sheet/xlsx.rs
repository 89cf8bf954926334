// src/sheet/xlsx.rs

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use calamine::{Reader, Xlsx, open_workbook};
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::{GridSheet, MergeRange, WorkbookError, WorkbookSource};

type XmlResult<T> = Result<T, Box<dyn std::error::Error>>;

pub struct XlsxSource {
    path: PathBuf,
    workbook: Xlsx<BufReader<File>>,
}

impl XlsxSource {
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let mut workbook: Xlsx<_> =
            open_workbook(path).map_err(|e| WorkbookError::corrupt(path, e))?;
        workbook
            .load_merged_regions()
            .map_err(|e| WorkbookError::corrupt(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            workbook,
        })
    }
}

impl WorkbookSource for XlsxSource {
    fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn load_sheet(&mut self, name: &str) -> Result<GridSheet, WorkbookError> {
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|e| WorkbookError::corrupt(&self.path, e))?;

        let mut sheet = GridSheet::new(name);
        sheet.fill_from_range(&range);

        let merges = self
            .workbook
            .worksheet_merge_cells(name)
            .unwrap_or(Ok(Vec::new()))
            .map_err(|e| WorkbookError::corrupt(&self.path, e))?;
        for dims in &merges {
            sheet.add_merge(MergeRange::from_dimensions(dims));
        }

        // Formats only drive precision; a workbook whose styles we cannot read
        // still converts with General everywhere.
        match read_number_formats(&self.path, name) {
            Ok(formats) => {
                debug!(sheet = name, formatted = formats.len(), "loaded number formats");
                for ((row, col), format) in formats {
                    sheet.set_format(row, col, format);
                }
            }
            Err(e) => warn!(sheet = name, error = %e, "number formats unavailable, using General"),
        }

        Ok(sheet)
    }
}

/// Number format code for every styled cell of one sheet, keyed 1-based.
fn read_number_formats(path: &Path, sheet_name: &str) -> XmlResult<HashMap<(u32, u32), String>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let xf_formats = parse_cell_xf_formats(&mut archive)?;
    let Some(sheet_path) = resolve_sheet_path(&mut archive, sheet_name)? else {
        return Ok(HashMap::new());
    };

    let mut formats = HashMap::new();
    for ((row, col), style) in parse_cell_styles(&mut archive, &sheet_path)? {
        if let Some(code) = xf_formats.get(style)
            && code != "General"
        {
            formats.insert((row, col), code.clone());
        }
    }
    Ok(formats)
}

fn builtin_format(id: u32) -> Option<&'static str> {
    Some(match id {
        0 => "General",
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "mm-dd-yy",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    })
}

/// Format code per `cellXfs` entry, in style-index order.
fn parse_cell_xf_formats(archive: &mut ZipArchive<impl Read + Seek>) -> XmlResult<Vec<String>> {
    let styles = match archive.by_name("xl/styles.xml") {
        Ok(file) => file,
        Err(_) => return Ok(Vec::new()),
    };
    let mut reader = XmlReader::from_reader(BufReader::new(styles));
    reader.config_mut().trim_text(true);

    let mut custom: HashMap<u32, String> = HashMap::new();
    let mut xf_ids: Vec<u32> = Vec::new();
    let mut in_cell_xfs = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let mut id = None;
                    let mut code = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"numFmtId" => id = attr.unescape_value()?.parse::<u32>().ok(),
                            b"formatCode" => code = attr.unescape_value()?.to_string(),
                            _ => {}
                        }
                    }
                    if let Some(id) = id {
                        custom.insert(id, code);
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let mut id = 0;
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"numFmtId" {
                            id = attr.unescape_value()?.parse::<u32>().unwrap_or(0);
                        }
                    }
                    xf_ids.push(id);
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(xf_ids
        .into_iter()
        .map(|id| {
            custom
                .get(&id)
                .cloned()
                .or_else(|| builtin_format(id).map(str::to_string))
                .unwrap_or_else(|| "General".to_string())
        })
        .collect())
}

/// Zip path of the worksheet part named `sheet_name`.
fn resolve_sheet_path(
    archive: &mut ZipArchive<impl Read + Seek>,
    sheet_name: &str,
) -> XmlResult<Option<String>> {
    let mut rel_id = None;
    {
        let workbook = archive.by_name("xl/workbook.xml")?;
        let mut reader = XmlReader::from_reader(BufReader::new(workbook));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                    let mut name = String::new();
                    let mut id = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => name = attr.unescape_value()?.to_string(),
                            b"r:id" => id = attr.unescape_value()?.to_string(),
                            _ => {}
                        }
                    }
                    if name == sheet_name {
                        rel_id = Some(id);
                        break;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
    }
    let Some(rel_id) = rel_id else {
        return Ok(None);
    };

    let rels = archive.by_name("xl/_rels/workbook.xml.rels")?;
    let mut reader = XmlReader::from_reader(BufReader::new(rels));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = String::new();
                let mut target = String::new();
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = attr.unescape_value()?.to_string(),
                        b"Target" => target = attr.unescape_value()?.to_string(),
                        _ => {}
                    }
                }
                if id == rel_id {
                    return Ok(Some(match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    }));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(None)
}

/// Style index of every `<c>` carrying an `s` attribute.
fn parse_cell_styles(
    archive: &mut ZipArchive<impl Read + Seek>,
    sheet_path: &str,
) -> XmlResult<Vec<((u32, u32), usize)>> {
    let sheet = archive.by_name(sheet_path)?;
    let mut reader = XmlReader::from_reader(BufReader::new(sheet));
    reader.config_mut().trim_text(true);

    let mut styles = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let mut cell = None;
                let mut style = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"r" => cell = parse_cell_ref(&attr.unescape_value()?),
                        b"s" => style = attr.unescape_value()?.parse::<usize>().ok(),
                        _ => {}
                    }
                }
                if let (Some(cell), Some(style)) = (cell, style) {
                    styles.push((cell, style));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(styles)
}

/// "AB12" → (12, 28).
fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col = 0u32;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row = digits.parse::<u32>().ok()?;
    Some((row, col))
}
