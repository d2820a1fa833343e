//! Uploaded file -> ordered header-keyed raw rows.
//!
//! The file kind comes from the extension only. CSV bytes may be UTF-8 (with
//! or without BOM) or Windows-1252; workbooks are read from the first sheet.

use std::borrow::Cow;
use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx, XlsxError};
use encoding_rs::WINDOWS_1252;
use tracing::debug;

use crate::error::DecodeError;
use crate::model::{Cell, RawRow};
use crate::normalize::MAX_SERIAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Xlsx,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Result<Self, DecodeError> {
        let lower = filename.trim().to_lowercase();
        if lower.ends_with(".csv") {
            Ok(FileKind::Csv)
        } else if lower.ends_with(".xlsx") {
            Ok(FileKind::Xlsx)
        } else {
            Err(DecodeError::UnsupportedFileType(filename.to_string()))
        }
    }
}

/// Decode `bytes` according to the extension of `filename`
pub fn decode_file(filename: &str, bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let rows = match FileKind::from_filename(filename)? {
        FileKind::Csv => decode_csv(bytes)?,
        FileKind::Xlsx => decode_xlsx(bytes)?,
    };
    debug!(filename, rows = rows.len(), "file decoded");
    Ok(rows)
}

// =============================================================================
// CSV
// =============================================================================

/// UTF-8 when valid (BOM stripped), otherwise Windows-1252
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text
        }
    }
}

/// `;` when the header line has more semicolons than commas
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

pub fn decode_csv(bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        // short records simply lack the trailing keys; extra fields are dropped
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, value)| {
                let cell = if value.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(value.to_string())
                };
                (h.clone(), cell)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn csv_error(e: csv::Error) -> DecodeError {
    DecodeError::Csv {
        line: e.position().map(|p| p.line()).unwrap_or(0),
        message: e.to_string(),
    }
}

// =============================================================================
// XLSX (first sheet only)
// =============================================================================

pub fn decode_xlsx(bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e: XlsxError| DecodeError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(DecodeError::NoSheets)?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| DecodeError::Workbook(e.to_string()))?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(cells) => cells.iter().map(|c| cell_from_data(c).as_text().trim().to_string()).collect(),
        None => return Ok(Vec::new()),
    };

    let rows = sheet_rows
        .filter(|cells| !cells.iter().all(is_blank_data))
        .map(|cells| row_from_cells(&headers, cells))
        .collect();
    Ok(rows)
}

/// Header-keyed row; columns without a header are ignored and missing
/// trailing cells read as empty.
fn row_from_cells(headers: &[String], cells: &[Data]) -> RawRow {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty())
        .map(|(i, h)| {
            let cell = cells.get(i).map(cell_from_data).unwrap_or(Cell::Empty);
            (h.clone(), cell)
        })
        .collect()
}

fn is_blank_data(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub(crate) fn cell_from_data(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) if dt.is_duration() => Cell::Number(dt.as_f64()),
        // as_datetime applies the workbook's 1900/1904 date system
        Data::DateTime(dt) if (0.0..=MAX_SERIAL).contains(&dt.as_f64()) => dt
            .as_datetime()
            .map(|d| Cell::Date(d.date()))
            .unwrap_or(Cell::Number(dt.as_f64())),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}
