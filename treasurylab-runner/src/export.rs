//! Persistence: CSV tables, JSON artifacts and the run manifest.
//!
//! Every file is written whole to `<name>.tmp` and renamed into place, so a
//! reader never sees a half-written table. CSV output has a fixed column
//! order and fixed float formatting and carries no timestamps, so identical
//! inputs produce byte-identical files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use treasurylab_core::data::parse_date;
use treasurylab_core::derive::MetricCatalog;
use treasurylab_core::format::{format_cell, OutputFormat};
use treasurylab_core::schema::DATE_COLUMN;
use treasurylab_core::table::{Table, TableColumn};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

// ─── CSV tables ─────────────────────────────────────────────────────

/// Serialize a table as CSV: `Date` first, then columns in table order.
///
/// Derived columns are formatted by their metric kind; every other column is
/// written raw. Null is an empty cell.
pub fn table_to_csv(table: &Table, catalog: &MetricCatalog, format: OutputFormat) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(table.column_names().into_iter().map(String::from));
    wtr.write_record(&header)?;

    let kinds: Vec<_> = table
        .columns()
        .iter()
        .map(|c| catalog.kind_of(&c.name))
        .collect();

    for (row, date) in table.dates().iter().enumerate() {
        let mut record = Vec::with_capacity(table.width() + 1);
        record.push(date.format("%Y-%m-%d").to_string());
        for (column, kind) in table.columns().iter().zip(&kinds) {
            record.push(format_cell(column.values[row], *kind, format));
        }
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Parse a persisted table back. Every non-`Date` column must be numeric.
pub fn table_from_csv(content: &str) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(content.as_bytes());
    let headers = rdr.headers().context("CSV has no header row")?.clone();

    if headers.get(0) != Some(DATE_COLUMN) {
        bail!("first column must be '{DATE_COLUMN}', found {:?}", headers.get(0));
    }
    let names: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut dates = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV row {}", i + 2))?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = parse_date(raw_date)
            .with_context(|| format!("row {}: invalid date '{raw_date}'", i + 2))?;
        dates.push(date);

        for (col, cell) in record.iter().skip(1).enumerate() {
            let value = if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<f64>().with_context(|| {
                    format!("row {}, column '{}': invalid number '{cell}'", i + 2, names[col])
                })?)
            };
            values[col].push(value);
        }
    }

    let mut table = Table::new(dates).context("dates must be strictly ascending")?;
    for (name, column) in names.into_iter().zip(values) {
        table = table.with_column(TableColumn::new(name, column))?;
    }
    Ok(table)
}

/// Read a persisted table from disk.
pub fn read_table_csv(path: &Path) -> Result<Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    table_from_csv(&content).with_context(|| format!("failed to parse {}", path.display()))
}

// ─── Atomic writes ──────────────────────────────────────────────────

/// Write `bytes` to `path` via a sibling `.tmp` file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        anyhow::anyhow!("atomic rename to {} failed: {e}", path.display())
    })
}

/// Write a serializable value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

// ─── Run manifest ───────────────────────────────────────────────────

/// One persisted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file: String,
    pub rows: usize,
    pub columns: usize,
    /// BLAKE3 hex digest of the file contents.
    pub blake3: String,
}

impl OutputFile {
    pub fn describe(path: &Path, table: &Table, bytes: &[u8]) -> Self {
        Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            rows: table.height(),
            columns: table.width(),
            blake3: blake3::hash(bytes).to_hex().to_string(),
        }
    }
}

/// Written last, after every table, so its presence marks a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub config_hash: String,
    pub ticker: String,
    pub reserve: String,
    pub shares_outstanding: f64,
    pub conflicts: usize,
    pub outputs: Vec<OutputFile>,
}

pub fn load_manifest(path: &Path) -> Result<RunManifest> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: RunManifest =
        serde_json::from_str(&json).context("failed to deserialize run manifest")?;
    if manifest.schema_version > MANIFEST_VERSION {
        bail!(
            "unsupported manifest version {} (max supported: {})",
            manifest.schema_version,
            MANIFEST_VERSION
        );
    }
    Ok(manifest)
}
