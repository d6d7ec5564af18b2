//! Local CSV records: manually tracked holdings and supplementary filings.
//!
//! A record has one header row with a `Date` column. Every other column is a
//! numeric series named after its header. Empty cells are missing
//! observations; thousands separators are tolerated.

use crate::schema::DATE_COLUMN;
use crate::series::{SourceSeries, TimeSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record file not found: {path}")]
    MissingFile { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("{path}, line {line}, column '{column}': cannot parse '{value}'")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
}

/// Read a CSV record from disk.
///
/// `required` names columns that must be present besides `Date`.
pub fn read_record(path: &Path, source: &str, required: &[&str]) -> Result<SourceSeries, RecordError> {
    if !path.exists() {
        return Err(RecordError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let file = std::fs::File::open(path).map_err(|e| RecordError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let record = read_record_from(file, path, source, required)?;
    tracing::info!(
        path = %path.display(),
        fields = ?record.field_names(),
        "loaded record"
    );
    Ok(record)
}

/// Read a CSV record from any reader. `path` is used only in error messages.
pub fn read_record_from<R: Read>(
    reader: R,
    path: &Path,
    source: &str,
    required: &[&str],
) -> Result<SourceSeries, RecordError> {
    let csv_err = |e| RecordError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(reader);
    let headers = rdr.headers().map_err(csv_err)?.clone();

    let date_idx = headers
        .iter()
        .position(|h| h == DATE_COLUMN)
        .ok_or_else(|| RecordError::MissingColumn {
            path: path.to_path_buf(),
            column: DATE_COLUMN.to_string(),
        })?;
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(RecordError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    let mut series: Vec<TimeSeries> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx)
        .map(|(_, h)| TimeSeries::new(h))
        .collect();

    for row in rdr.records() {
        let row = row.map_err(csv_err)?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let invalid = |column: &str, value: &str| RecordError::InvalidValue {
            path: path.to_path_buf(),
            line,
            column: column.to_string(),
            value: value.to_string(),
        };

        let raw_date = row.get(date_idx).unwrap_or_default();
        let date = parse_date(raw_date).ok_or_else(|| invalid(DATE_COLUMN, raw_date))?;

        let values = row.iter().enumerate().filter(|(i, _)| *i != date_idx);
        for ((_, cell), ts) in values.zip(series.iter_mut()) {
            if cell.is_empty() {
                continue;
            }
            let value = parse_number(cell).ok_or_else(|| invalid(&ts.name, cell))?;
            if ts.insert(date, value).is_some() {
                tracing::warn!(path = %path.display(), field = %ts.name, %date, "duplicate date in record; later row wins");
            }
        }
    }

    Ok(SourceSeries::new(source, series))
}

/// Parse a date cell: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339.
/// Time of day and offset are dropped.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok()
}
