//! Import file parsers
//!
//! CSV and spreadsheet files become rows of column-name keyed values. The
//! first row is the header. Wholly empty rows are skipped. Any structural
//! problem is an [`ImportError::Format`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{Number, Value};

use dictum_core::{ImportError, ValueMap};

fn format_error(e: impl std::fmt::Display) -> ImportError {
    ImportError::Format {
        reason: e.to_string(),
    }
}

fn check_headers(headers: &[String]) -> Result<(), ImportError> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(format_error("missing header row"));
    }
    let mut seen = BTreeSet::new();
    for header in headers {
        if header.is_empty() {
            return Err(format_error("empty column header"));
        }
        if !seen.insert(header.to_ascii_lowercase()) {
            return Err(format_error(format!("duplicate column header '{}'", header)));
        }
    }
    Ok(())
}

/// Parse a CSV file. Every row must have as many fields as the header.
pub fn parse_csv(path: &Path) -> Result<Vec<ValueMap>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(format_error)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(format_error)?
        .iter()
        .map(str::to_string)
        .collect();
    check_headers(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(format_error)?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(|cell| Value::String(cell.to_string())))
                .collect(),
        );
    }
    Ok(rows)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|naive| Value::String(naive.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
    }
}

/// Parse the first worksheet of an xls or xlsx workbook.
pub fn parse_spreadsheet(path: &Path) -> Result<Vec<ValueMap>, ImportError> {
    let mut workbook = open_workbook_auto(path).map_err(format_error)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| format_error("workbook has no worksheets"))?
        .map_err(format_error)?;

    let mut cells = range.rows();
    let headers: Vec<String> = cells
        .next()
        .ok_or_else(|| format_error("missing header row"))?
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect();
    check_headers(&headers)?;

    Ok(cells
        .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
        .map(|row| {
            headers
                .iter()
                .cloned()
                .zip(row.iter().map(cell_value))
                .collect()
        })
        .collect())
}

/// Parse by (already validated, lowercase) extension.
pub fn parse_file(path: &Path, extension: &str) -> Result<Vec<ValueMap>, ImportError> {
    match extension {
        "csv" => parse_csv(path),
        "xls" | "xlsx" => parse_spreadsheet(path),
        other => Err(ImportError::UnsupportedExtension {
            extension: other.to_string(),
        }),
    }
}

/// [`parse_file`] on the blocking pool.
pub async fn parse_file_blocking(
    path: PathBuf,
    extension: String,
) -> Result<Vec<ValueMap>, ImportError> {
    tokio::task::spawn_blocking(move || parse_file(&path, &extension))
        .await
        .map_err(|e| format_error(format!("parser task failed: {}", e)))?
}
