//! Spreadsheet parsing for campaign audiences
//!
//! Reads the first worksheet of an `.xlsx`/`.xls` upload, finds the phone
//! column by its header and normalises every data row.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;
use wacast_common::Error;

use crate::phone;

/// Header names recognised as the phone column (compared case-insensitively)
pub const PHONE_HEADERS: [&str; 4] = ["телефон", "phone", "phone_number", "номер"];

/// Spreadsheet errors
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("the spreadsheet is empty")]
    EmptyFile,

    #[error("no phone column found; expected one of: {}", PHONE_HEADERS.join(", "))]
    PhoneColumnNotFound,

    #[error("the spreadsheet contains no valid phone numbers")]
    NoValidPhoneNumbers,

    #[error("failed to parse spreadsheet: {0}")]
    Parse(String),
}

impl SpreadsheetError {
    pub fn code(&self) -> &'static str {
        match self {
            SpreadsheetError::EmptyFile => "empty_file",
            SpreadsheetError::PhoneColumnNotFound => "phone_column_not_found",
            SpreadsheetError::NoValidPhoneNumbers => "no_valid_phone_numbers",
            SpreadsheetError::Parse(_) => "parse_error",
        }
    }
}

impl From<SpreadsheetError> for Error {
    fn from(e: SpreadsheetError) -> Self {
        Error::Validation {
            code: e.code(),
            field: Some("file".to_string()),
            message: e.to_string(),
        }
    }
}

impl From<calamine::Error> for SpreadsheetError {
    fn from(e: calamine::Error) -> Self {
        SpreadsheetError::Parse(e.to_string())
    }
}

/// One data row of the sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRow {
    /// 1-based row number as shown by spreadsheet applications
    pub row_number: usize,
    pub raw_value: String,
    pub phone: Option<String>,
    pub error: Option<String>,
}

/// A repeated number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub row_number: usize,
    pub phone: String,
    pub first_seen_row: usize,
}

/// Parsing statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Every row of the sheet, header included
    pub total_rows: usize,
    /// Non-blank rows below the header
    pub data_rows: usize,
    /// Rows that yielded a number not seen before
    pub valid: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub unique: usize,
    pub duplicates: Vec<DuplicateEntry>,
}

/// Result of parsing an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSheet {
    pub rows: Vec<ParsedRow>,
    /// Unique canonical numbers in first-seen order
    pub phones: Vec<String>,
    pub stats: ParseStats,
}

/// Parse an uploaded workbook
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<ParsedSheet, SpreadsheetError> {
    if bytes.is_empty() {
        return Err(SpreadsheetError::EmptyFile);
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::EmptyFile)??;

    // The range starts at the first used cell; keep row numbers absolute
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    parse_rows(first_row, rows)
}

/// Classify already extracted cell text. `first_row` is the 0-based sheet row
/// of `rows[0]`, which must be the header.
pub fn parse_rows(first_row: usize, rows: Vec<Vec<String>>) -> Result<ParsedSheet, SpreadsheetError> {
    let mut rows = rows.into_iter();
    let header = rows.next().ok_or(SpreadsheetError::EmptyFile)?;
    if header.iter().all(|cell| cell.trim().is_empty()) {
        return Err(SpreadsheetError::EmptyFile);
    }

    let column = find_phone_column(&header).ok_or(SpreadsheetError::PhoneColumnNotFound)?;

    let mut stats = ParseStats {
        total_rows: 1,
        ..ParseStats::default()
    };
    let mut parsed = Vec::new();
    let mut phones = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (offset, row) in rows.enumerate() {
        stats.total_rows += 1;
        let row_number = first_row + offset + 2;
        let raw = row.get(column).map(|c| c.trim().to_string()).unwrap_or_default();
        if raw.is_empty() {
            continue;
        }
        stats.data_rows += 1;

        match phone::normalize(&raw) {
            Ok(canonical) => {
                if let Some(&first) = first_seen.get(&canonical) {
                    stats.duplicate += 1;
                    stats.duplicates.push(DuplicateEntry {
                        row_number,
                        phone: canonical.clone(),
                        first_seen_row: first,
                    });
                } else {
                    first_seen.insert(canonical.clone(), row_number);
                    phones.push(canonical.clone());
                }
                parsed.push(ParsedRow {
                    row_number,
                    raw_value: raw,
                    phone: Some(canonical),
                    error: None,
                });
            }
            Err(e) => {
                stats.invalid += 1;
                parsed.push(ParsedRow {
                    row_number,
                    raw_value: raw,
                    phone: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    stats.unique = phones.len();
    stats.valid = phones.len();

    debug!(
        total_rows = stats.total_rows,
        data_rows = stats.data_rows,
        valid = stats.valid,
        invalid = stats.invalid,
        duplicate = stats.duplicate,
        "Parsed spreadsheet"
    );

    if phones.is_empty() {
        return Err(SpreadsheetError::NoValidPhoneNumbers);
    }

    Ok(ParsedSheet {
        rows: parsed,
        phones,
        stats,
    })
}

fn find_phone_column(header: &[String]) -> Option<usize> {
    header.iter().position(|cell| {
        let name = cell.trim().to_lowercase();
        PHONE_HEADERS.contains(&name.as_str())
    })
}

/// Render a cell the way a user typed it. Numeric cells holding phone
/// numbers come back as floats and must not gain a `.0` suffix.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.0}", f),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sheet(header: &str, values: &[&str]) -> Vec<Vec<String>> {
        let mut rows = vec![vec!["name".to_string(), header.to_string()]];
        for v in values {
            rows.push(vec!["x".to_string(), v.to_string()]);
        }
        rows
    }

    #[test]
    fn test_parse_rows_classifies() {
        let parsed = parse_rows(0, sheet("Phone", &["79161234567", "not-a-phone", "79161234567"]))
            .unwrap();

        assert_eq!(parsed.phones, vec!["79161234567"]);
        assert_eq!(parsed.stats.total_rows, 4);
        assert_eq!(parsed.stats.data_rows, 3);
        assert_eq!(parsed.stats.valid, 1);
        assert_eq!(parsed.stats.invalid, 1);
        assert_eq!(parsed.stats.duplicate, 1);
        assert_eq!(parsed.stats.unique, 1);
        assert_eq!(
            parsed.stats.duplicates,
            vec![DuplicateEntry {
                row_number: 4,
                phone: "79161234567".to_string(),
                first_seen_row: 2,
            }]
        );
        assert_eq!(parsed.rows[1].row_number, 3);
        assert!(parsed.rows[1].error.is_some());
    }

    #[test]
    fn test_header_matching_is_case_insensitive() {
        for header in ["ТЕЛЕФОН", " phone_number ", "Номер", "PHONE"] {
            let parsed = parse_rows(0, sheet(header, &["89161234567"])).unwrap();
            assert_eq!(parsed.phones, vec!["79161234567"]);
        }
    }

    #[test]
    fn test_blank_rows_skipped() {
        let parsed = parse_rows(0, sheet("phone", &["", "79161234567", "   "])).unwrap();
        assert_eq!(parsed.stats.total_rows, 4);
        assert_eq!(parsed.stats.data_rows, 1);
    }

    #[test]
    fn test_failure_modes() {
        assert!(matches!(
            parse_rows(0, vec![]),
            Err(SpreadsheetError::EmptyFile)
        ));
        assert!(matches!(
            parse_rows(0, sheet("email", &["79161234567"])),
            Err(SpreadsheetError::PhoneColumnNotFound)
        ));
        assert!(matches!(
            parse_rows(0, sheet("phone", &["abc", "123"])),
            Err(SpreadsheetError::NoValidPhoneNumbers)
        ));
        assert!(matches!(
            parse_spreadsheet(b"definitely not a workbook"),
            Err(SpreadsheetError::Parse(_))
        ));
        assert!(matches!(parse_spreadsheet(b""), Err(SpreadsheetError::EmptyFile)));
    }

    #[test]
    fn test_numeric_cells_render_without_fraction() {
        assert_eq!(cell_text(&Data::Float(79161234567.0)), "79161234567");
        assert_eq!(cell_text(&Data::Int(9161234567)), "9161234567");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_error_maps_to_file_field() {
        let err: Error = SpreadsheetError::PhoneColumnNotFound.into();
        assert_eq!(err.code(), "phone_column_not_found");
        assert_eq!(err.field(), Some("file"));
        assert_eq!(err.status_code(), 400);
    }
}
