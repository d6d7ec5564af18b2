//! Market-data provider trait and structured error types.
//!
//! The `MarketDataProvider` trait abstracts over where prices and filings come
//! from (Yahoo Finance, the Parquet cache, in-memory fixtures) so the pipeline
//! can run offline and be tested without a network.

use crate::series::TimeSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Structured error types for provider and cache operations.
///
/// These are designed to be displayable directly in CLI output.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider blocked the request (HTTP 403)")]
    Blocked,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no {what} available for {symbol}")]
    NoData { symbol: String, what: String },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached data for '{symbol}'; run `fetch` first or drop --offline")]
    NoCachedData { symbol: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Quarterly balance-sheet line items, keyed by provider label.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub symbol: String,
    items: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl BalanceSheet {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            items: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, label: &str, period_end: NaiveDate, value: f64) {
        self.items
            .entry(label.to_string())
            .or_default()
            .insert(period_end, value);
    }

    /// Observations for one line item, by period-end date.
    pub fn line_item(&self, label: &str) -> Option<&BTreeMap<NaiveDate, f64>> {
        self.items.get(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.items.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.values().all(|v| v.is_empty())
    }

    /// Flattened `(label, date, value)` rows, sorted by label then date.
    pub fn rows(&self) -> impl Iterator<Item = (&str, NaiveDate, f64)> + '_ {
        self.items
            .iter()
            .flat_map(|(label, obs)| obs.iter().map(move |(d, v)| (label.as_str(), *d, *v)))
    }
}

/// Trait for market-data sources.
///
/// One call per series per run; implementations do not retry.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Daily closing prices for `symbol` with `start <= date <= end`.
    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, DataError>;

    /// Current shares-outstanding figure for `symbol`.
    fn shares_outstanding(&self, symbol: &str) -> Result<f64, DataError>;

    /// Quarterly balance-sheet line items for `symbol`.
    ///
    /// Labels the provider does not carry are simply absent from the result;
    /// the field schema decides whether that is fatal.
    fn balance_sheet(&self, symbol: &str, labels: &[&str]) -> Result<BalanceSheet, DataError>;
}

/// In-memory provider backed by prepared series. Used for fixtures and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    closes: BTreeMap<String, TimeSeries>,
    shares: BTreeMap<String, f64>,
    sheets: BTreeMap<String, BalanceSheet>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_closes(mut self, symbol: &str, closes: TimeSeries) -> Self {
        self.closes.insert(symbol.to_string(), closes);
        self
    }

    pub fn with_shares(mut self, symbol: &str, shares: f64) -> Self {
        self.shares.insert(symbol.to_string(), shares);
        self
    }

    pub fn with_balance_sheet(mut self, sheet: BalanceSheet) -> Self {
        self.sheets.insert(sheet.symbol.clone(), sheet);
        self
    }
}

impl MarketDataProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, DataError> {
        self.closes
            .get(symbol)
            .map(|s| s.between(start, end))
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
    }

    fn shares_outstanding(&self, symbol: &str) -> Result<f64, DataError> {
        self.shares
            .get(symbol)
            .copied()
            .ok_or_else(|| DataError::NoData {
                symbol: symbol.to_string(),
                what: "shares outstanding".into(),
            })
    }

    fn balance_sheet(&self, symbol: &str, labels: &[&str]) -> Result<BalanceSheet, DataError> {
        let sheet = self
            .sheets
            .get(symbol)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        let mut out = BalanceSheet::new(symbol);
        for label in labels {
            if let Some(obs) = sheet.line_item(label) {
                for (d, v) in obs {
                    out.insert(label, *d, *v);
                }
            }
        }
        Ok(out)
    }
}

/// Progress callback for multi-series fetches.
pub trait FetchProgress {
    /// Called when starting to fetch one item (`"MSTR closes"`, ...).
    fn on_start(&self, item: &str, index: usize, total: usize);

    /// Called when one item completes.
    fn on_complete(&self, item: &str, result: &Result<(), DataError>);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, item: &str, index: usize, total: usize) {
        tracing::info!("[{}/{}] fetching {item}", index + 1, total);
    }

    fn on_complete(&self, item: &str, result: &Result<(), DataError>) {
        match result {
            Ok(()) => tracing::info!("  ok: {item}"),
            Err(e) => tracing::error!("  failed: {item}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn static_provider_filters_range() {
        let closes = TimeSeries::from_points(
            "close",
            vec![(d("2024-01-01"), 1.0), (d("2024-02-01"), 2.0)],
        );
        let p = StaticProvider::new().with_closes("MSTR", closes);
        let got = p
            .fetch_closes("MSTR", d("2024-01-15"), d("2024-03-01"))
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(matches!(
            p.fetch_closes("TSLA", d("2024-01-01"), d("2024-03-01")),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn static_provider_returns_requested_labels_only() {
        let mut sheet = BalanceSheet::new("MSTR");
        sheet.insert("Total Assets", d("2024-03-31"), 1.0);
        sheet.insert("Cash", d("2024-03-31"), 2.0);
        let p = StaticProvider::new().with_balance_sheet(sheet);

        let got = p.balance_sheet("MSTR", &["Total Assets", "Missing"]).unwrap();
        assert_eq!(got.labels(), vec!["Total Assets"]);
    }

    #[test]
    fn balance_sheet_rows_are_sorted() {
        let mut sheet = BalanceSheet::new("MSTR");
        sheet.insert("B", d("2024-06-30"), 2.0);
        sheet.insert("A", d("2024-06-30"), 3.0);
        sheet.insert("A", d("2024-03-31"), 1.0);
        let rows: Vec<_> = sheet.rows().collect();
        assert_eq!(rows[0], ("A", d("2024-03-31"), 1.0));
        assert_eq!(rows[2], ("B", d("2024-06-30"), 2.0));
    }
}
