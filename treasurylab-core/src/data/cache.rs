//! Parquet cache with Hive-style partitioning.
//!
//! Layout:
//! ```text
//! {cache_dir}/symbol={SYMBOL}/close.parquet          date, close
//! {cache_dir}/symbol={SYMBOL}/balance_sheet.parquet  label, date, value
//! {cache_dir}/symbol={SYMBOL}/meta.json
//! ```
//!
//! Writes are atomic (write to .tmp, rename into place). A file that fails
//! validation on load is quarantined as `{filename}.quarantined`.

use super::provider::{BalanceSheet, DataError, MarketDataProvider};
use crate::series::TimeSeries;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const CLOSE_FILE: &str = "close.parquet";
const BALANCE_SHEET_FILE: &str = "balance_sheet.parquet";

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheMeta {
    pub symbol: String,
    pub close_start: Option<NaiveDate>,
    pub close_end: Option<NaiveDate>,
    pub close_count: usize,
    pub balance_sheet_rows: usize,
    pub shares_outstanding: Option<f64>,
    /// BLAKE3 hex digest per cached file name.
    pub file_hashes: BTreeMap<String, String>,
    pub source: String,
    pub cached_at: Option<chrono::NaiveDateTime>,
}

/// The Parquet cache.
#[derive(Debug, Clone)]
pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory for a specific symbol: `{cache_dir}/symbol={SYMBOL}/`
    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    /// Cache daily closes for a symbol, replacing any previous copy.
    pub fn write_closes(
        &self,
        symbol: &str,
        closes: &TimeSeries,
        source: &str,
    ) -> Result<(), DataError> {
        if closes.is_empty() {
            return Err(DataError::CacheError(format!("no closes to cache for {symbol}")));
        }
        let df = closes_to_dataframe(closes)?;
        let hash = self.write_file(symbol, CLOSE_FILE, df)?;

        self.update_meta(symbol, source, |meta| {
            meta.close_start = closes.first_date();
            meta.close_end = closes.last_date();
            meta.close_count = closes.len();
            meta.file_hashes.insert(CLOSE_FILE.to_string(), hash);
        })
    }

    /// Cache a balance sheet in long format, replacing any previous copy.
    pub fn write_balance_sheet(&self, sheet: &BalanceSheet, source: &str) -> Result<(), DataError> {
        if sheet.is_empty() {
            return Err(DataError::CacheError(format!(
                "no balance-sheet rows to cache for {}",
                sheet.symbol
            )));
        }
        let df = balance_sheet_to_dataframe(sheet)?;
        let rows = df.height();
        let hash = self.write_file(&sheet.symbol, BALANCE_SHEET_FILE, df)?;

        self.update_meta(&sheet.symbol, source, |meta| {
            meta.balance_sheet_rows = rows;
            meta.file_hashes.insert(BALANCE_SHEET_FILE.to_string(), hash);
        })
    }

    /// Record the shares-outstanding figure in the sidecar.
    pub fn write_shares_outstanding(
        &self,
        symbol: &str,
        shares: f64,
        source: &str,
    ) -> Result<(), DataError> {
        self.update_meta(symbol, source, |meta| meta.shares_outstanding = Some(shares))
    }

    /// Load cached closes, sorted by date.
    pub fn load_closes(&self, symbol: &str) -> Result<TimeSeries, DataError> {
        let df = self.read_file(symbol, CLOSE_FILE, &["date", "close"])?;
        dataframe_to_closes(symbol, &df)
    }

    /// Load the cached balance sheet.
    pub fn load_balance_sheet(&self, symbol: &str) -> Result<BalanceSheet, DataError> {
        let df = self.read_file(symbol, BALANCE_SHEET_FILE, &["label", "date", "value"])?;
        dataframe_to_balance_sheet(symbol, &df)
    }

    /// Metadata for a cached symbol, if any.
    pub fn get_meta(&self, symbol: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Cache status for each symbol.
    pub fn status(&self, symbols: &[&str]) -> Vec<CacheStatus> {
        symbols
            .iter()
            .map(|sym| {
                let meta = self.get_meta(sym);
                CacheStatus {
                    symbol: sym.to_string(),
                    cached: meta.is_some(),
                    close_start: meta.as_ref().and_then(|m| m.close_start),
                    close_end: meta.as_ref().and_then(|m| m.close_end),
                    close_count: meta.as_ref().map(|m| m.close_count),
                    balance_sheet_rows: meta.as_ref().map(|m| m.balance_sheet_rows),
                    shares_outstanding: meta.as_ref().and_then(|m| m.shares_outstanding),
                }
            })
            .collect()
    }

    /// Whether cached closes span the requested range.
    pub fn covers_range(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> CoverageResult {
        let Some(meta) = self.get_meta(symbol) else {
            return CoverageResult::NotCached;
        };
        match (meta.close_start, meta.close_end) {
            (Some(s), Some(e)) if s <= start && e >= end => CoverageResult::FullyCovered,
            (Some(s), Some(e)) => CoverageResult::PartiallyCovered {
                cached_start: s,
                cached_end: e,
            },
            _ => CoverageResult::NotCached,
        }
    }

    /// Atomically write one frame and return the BLAKE3 hash of the file.
    fn write_file(&self, symbol: &str, name: &str, mut df: DataFrame) -> Result<String, DataError> {
        let dir = self.symbol_dir(symbol);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let path = dir.join(name);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;

        let bytes = fs::read(&tmp_path)
            .map_err(|e| DataError::CacheError(format!("read back {}: {e}", tmp_path.display())))?;
        let hash = blake3::hash(&bytes).to_hex().to_string();

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;
        tracing::debug!(path = %path.display(), rows = df.height(), "cached");
        Ok(hash)
    }

    /// Read and validate one frame, quarantining it if it is corrupt.
    fn read_file(
        &self,
        symbol: &str,
        name: &str,
        expected_cols: &[&str],
    ) -> Result<DataFrame, DataError> {
        let path = self.symbol_dir(symbol).join(name);
        if !path.exists() {
            return Err(DataError::NoCachedData {
                symbol: symbol.to_string(),
            });
        }
        match load_and_validate_parquet(&path, expected_cols) {
            Ok(df) => Ok(df),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                tracing::warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                let _ = fs::rename(&path, &quarantine);
                Err(DataError::NoCachedData {
                    symbol: symbol.to_string(),
                })
            }
        }
    }

    fn update_meta(
        &self,
        symbol: &str,
        source: &str,
        apply: impl FnOnce(&mut CacheMeta),
    ) -> Result<(), DataError> {
        let dir = self.symbol_dir(symbol);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut meta = self.get_meta(symbol).unwrap_or_else(|| CacheMeta {
            symbol: symbol.to_string(),
            ..CacheMeta::default()
        });
        apply(&mut meta);
        meta.source = source.to_string();
        meta.cached_at = Some(chrono::Local::now().naive_local());

        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        let path = self.meta_path(symbol);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| DataError::CacheError(format!("meta rename: {e}")))
    }
}

/// Cache status for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub cached: bool,
    pub close_start: Option<NaiveDate>,
    pub close_end: Option<NaiveDate>,
    pub close_count: Option<usize>,
    pub balance_sheet_rows: Option<usize>,
    pub shares_outstanding: Option<f64>,
}

/// How well the cache covers the requested date range.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    PartiallyCovered {
        cached_start: NaiveDate,
        cached_end: NaiveDate,
    },
}

/// Provider that serves only from the Parquet cache. Used for `--offline`
/// runs and for the read side of an online run after the download step.
#[derive(Debug, Clone)]
pub struct CachedProvider {
    cache: ParquetCache,
}

impl CachedProvider {
    pub fn new(cache: ParquetCache) -> Self {
        Self { cache }
    }
}

impl MarketDataProvider for CachedProvider {
    fn name(&self) -> &str {
        "parquet_cache"
    }

    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, DataError> {
        if let CoverageResult::PartiallyCovered {
            cached_start,
            cached_end,
        } = self.cache.covers_range(symbol, start, end)
        {
            tracing::warn!(
                symbol,
                %cached_start,
                %cached_end,
                "cache covers only part of the requested range"
            );
        }
        Ok(self.cache.load_closes(symbol)?.between(start, end))
    }

    fn shares_outstanding(&self, symbol: &str) -> Result<f64, DataError> {
        self.cache
            .get_meta(symbol)
            .and_then(|m| m.shares_outstanding)
            .ok_or_else(|| DataError::NoCachedData {
                symbol: symbol.to_string(),
            })
    }

    fn balance_sheet(&self, symbol: &str, labels: &[&str]) -> Result<BalanceSheet, DataError> {
        let cached = self.cache.load_balance_sheet(symbol)?;
        let mut out = BalanceSheet::new(symbol);
        for label in labels {
            if let Some(obs) = cached.line_item(label) {
                for (d, v) in obs {
                    out.insert(label, *d, *v);
                }
            }
        }
        Ok(out)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn to_epoch_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn from_epoch_days(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(i64::from(days))
}

fn date_column(name: &str, dates: Vec<i32>) -> Result<Column, DataError> {
    Column::new(name.into(), dates)
        .cast(&DataType::Date)
        .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))
}

fn closes_to_dataframe(closes: &TimeSeries) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = closes.iter().map(|(d, _)| to_epoch_days(d)).collect();
    let values: Vec<f64> = closes.iter().map(|(_, v)| v).collect();

    DataFrame::new(vec![
        date_column("date", dates)?,
        Column::new("close".into(), values),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn balance_sheet_to_dataframe(sheet: &BalanceSheet) -> Result<DataFrame, DataError> {
    let mut labels = Vec::new();
    let mut dates = Vec::new();
    let mut values = Vec::new();
    for (label, date, value) in sheet.rows() {
        labels.push(label.to_string());
        dates.push(to_epoch_days(date));
        values.push(value);
    }

    DataFrame::new(vec![
        Column::new("label".into(), labels),
        date_column("date", dates)?,
        Column::new("value".into(), values),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path, expected_cols: &[&str]) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::CacheError("empty parquet file".into()));
    }
    for col_name in expected_cols {
        if df.column(col_name).is_err() {
            return Err(DataError::CacheError(format!("missing column '{col_name}'")));
        }
    }
    Ok(df)
}

fn dataframe_to_closes(symbol: &str, df: &DataFrame) -> Result<TimeSeries, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let date_ca = df.column("date").map_err(map_err)?.date().map_err(map_err)?;
    let close_ca = df.column("close").map_err(map_err)?.f64().map_err(map_err)?;

    let mut closes = TimeSeries::new(symbol);
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        if let Some(v) = close_ca.get(i) {
            closes.insert(from_epoch_days(days), v);
        }
    }
    Ok(closes)
}

fn dataframe_to_balance_sheet(symbol: &str, df: &DataFrame) -> Result<BalanceSheet, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let label_ca = df.column("label").map_err(map_err)?.str().map_err(map_err)?;
    let date_ca = df.column("date").map_err(map_err)?.date().map_err(map_err)?;
    let value_ca = df.column("value").map_err(map_err)?.f64().map_err(map_err)?;

    let mut sheet = BalanceSheet::new(symbol);
    for i in 0..df.height() {
        let (Some(label), Some(days), Some(value)) =
            (label_ca.get(i), date_ca.get(i), value_ca.get(i))
        else {
            return Err(DataError::ParquetError(format!("null cell at row {i}")));
        };
        sheet.insert(label, from_epoch_days(days), value);
    }
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample_closes() -> TimeSeries {
        TimeSeries::from_points(
            "MSTR",
            vec![(d("2024-01-02"), 100.0), (d("2024-01-03"), 101.5)],
        )
    }

    #[test]
    fn closes_round_trip_through_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write_closes("MSTR", &sample_closes(), "test").unwrap();

        let loaded = cache.load_closes("MSTR").unwrap();
        assert_eq!(loaded.points, sample_closes().points);
        assert!(dir.path().join("symbol=MSTR").join(CLOSE_FILE).exists());
    }

    #[test]
    fn balance_sheet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let mut sheet = BalanceSheet::new("MSTR");
        sheet.insert("Total Assets", d("2024-03-31"), 7.0e9);
        sheet.insert("Total Liabilities Net Minority Interest", d("2024-03-31"), 4.0e9);
        cache.write_balance_sheet(&sheet, "test").unwrap();

        assert_eq!(cache.load_balance_sheet("MSTR").unwrap(), sheet);
    }

    #[test]
    fn meta_accumulates_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write_closes("MSTR", &sample_closes(), "test").unwrap();
        cache.write_shares_outstanding("MSTR", 250_000.0, "test").unwrap();

        let meta = cache.get_meta("MSTR").unwrap();
        assert_eq!(meta.close_count, 2);
        assert_eq!(meta.close_start, Some(d("2024-01-02")));
        assert_eq!(meta.shares_outstanding, Some(250_000.0));
        assert_eq!(meta.file_hashes[CLOSE_FILE].len(), 64);
    }

    #[test]
    fn missing_symbol_is_no_cached_data() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        assert!(matches!(
            cache.load_closes("NOPE"),
            Err(DataError::NoCachedData { .. })
        ));
        assert_eq!(
            cache.covers_range("NOPE", d("2024-01-01"), d("2024-02-01")),
            CoverageResult::NotCached
        );
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let sym_dir = dir.path().join("symbol=MSTR");
        fs::create_dir_all(&sym_dir).unwrap();
        fs::write(sym_dir.join(CLOSE_FILE), b"not parquet").unwrap();

        assert!(cache.load_closes("MSTR").is_err());
        assert!(sym_dir.join("close.parquet.quarantined").exists());
    }

    #[test]
    fn coverage_reports_partial_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write_closes("MSTR", &sample_closes(), "test").unwrap();

        assert_eq!(
            cache.covers_range("MSTR", d("2024-01-02"), d("2024-01-03")),
            CoverageResult::FullyCovered
        );
        assert!(matches!(
            cache.covers_range("MSTR", d("2023-12-01"), d("2024-01-03")),
            CoverageResult::PartiallyCovered { .. }
        ));
    }

    #[test]
    fn cached_provider_serves_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write_closes("MSTR", &sample_closes(), "test").unwrap();
        cache.write_shares_outstanding("MSTR", 1_000.0, "test").unwrap();

        let provider = CachedProvider::new(cache);
        let closes = provider
            .fetch_closes("MSTR", d("2024-01-03"), d("2024-12-31"))
            .unwrap();
        assert_eq!(closes.len(), 1);
        assert_eq!(provider.shares_outstanding("MSTR").unwrap(), 1_000.0);
        assert!(provider.balance_sheet("MSTR", &["Total Assets"]).is_err());
    }
}
