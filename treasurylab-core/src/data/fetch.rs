//! Download orchestrator: pulls every provider series a pipeline run needs and
//! stores it in the Parquet cache.

use super::cache::ParquetCache;
use super::provider::{DataError, FetchProgress, MarketDataProvider};
use chrono::NaiveDate;

/// What to download.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub ticker: String,
    pub reserve: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Balance-sheet labels to request for the ticker.
    pub labels: Vec<String>,
}

/// Outcome of a download batch.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub errors: Vec<(String, DataError)>,
}

impl FetchSummary {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Download closes for both symbols, the ticker's shares outstanding and its
/// balance sheet. Each item is attempted once; failures are collected rather
/// than aborting the batch.
pub fn download_market_data(
    provider: &dyn MarketDataProvider,
    cache: &ParquetCache,
    request: &FetchRequest,
    progress: &dyn FetchProgress,
) -> FetchSummary {
    let source = provider.name().to_string();
    let labels: Vec<&str> = request.labels.iter().map(String::as_str).collect();

    type Step<'a> = Box<dyn Fn() -> Result<(), DataError> + 'a>;
    let steps: Vec<(String, Step<'_>)> = vec![
        (
            format!("{} closes", request.ticker),
            Box::new(|| {
                let closes = provider.fetch_closes(&request.ticker, request.start, request.end)?;
                cache.write_closes(&request.ticker, &closes, &source)
            }),
        ),
        (
            format!("{} closes", request.reserve),
            Box::new(|| {
                let closes = provider.fetch_closes(&request.reserve, request.start, request.end)?;
                cache.write_closes(&request.reserve, &closes, &source)
            }),
        ),
        (
            format!("{} shares outstanding", request.ticker),
            Box::new(|| {
                let shares = provider.shares_outstanding(&request.ticker)?;
                cache.write_shares_outstanding(&request.ticker, shares, &source)
            }),
        ),
        (
            format!("{} balance sheet", request.ticker),
            Box::new(|| {
                let sheet = provider.balance_sheet(&request.ticker, &labels)?;
                cache.write_balance_sheet(&sheet, &source)
            }),
        ),
    ];

    let total = steps.len();
    let mut summary = FetchSummary {
        total,
        ..FetchSummary::default()
    };
    for (i, (item, step)) in steps.iter().enumerate() {
        progress.on_start(item, i, total);
        let result = step();
        progress.on_complete(item, &result);
        match result {
            Ok(()) => summary.succeeded += 1,
            Err(e) => summary.errors.push((item.clone(), e)),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{BalanceSheet, StaticProvider};
    use crate::series::TimeSeries;
    use std::cell::RefCell;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        completed: RefCell<Vec<(String, bool)>>,
    }

    impl FetchProgress for Recorder {
        fn on_start(&self, _item: &str, _index: usize, _total: usize) {}

        fn on_complete(&self, item: &str, result: &Result<(), DataError>) {
            self.completed
                .borrow_mut()
                .push((item.to_string(), result.is_ok()));
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            ticker: "MSTR".into(),
            reserve: "BTC-USD".into(),
            start: d("2024-01-01"),
            end: d("2024-12-31"),
            labels: vec!["Total Assets".into()],
        }
    }

    #[test]
    fn downloads_everything_into_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let mut sheet = BalanceSheet::new("MSTR");
        sheet.insert("Total Assets", d("2024-03-31"), 1.0e9);
        let provider = StaticProvider::new()
            .with_closes("MSTR", TimeSeries::from_points("c", vec![(d("2024-01-02"), 10.0)]))
            .with_closes("BTC-USD", TimeSeries::from_points("c", vec![(d("2024-01-02"), 5.0)]))
            .with_shares("MSTR", 2.0)
            .with_balance_sheet(sheet);

        let summary = download_market_data(&provider, &cache, &request(), &Recorder::default());
        assert!(summary.all_succeeded(), "{:?}", summary.errors);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(cache.get_meta("MSTR").unwrap().shares_outstanding, Some(2.0));
        assert_eq!(cache.load_closes("BTC-USD").unwrap().len(), 1);
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = StaticProvider::new()
            .with_closes("BTC-USD", TimeSeries::from_points("c", vec![(d("2024-01-02"), 5.0)]));
        let recorder = Recorder::default();

        let summary = download_market_data(&provider, &cache, &request(), &recorder);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed(), 3);
        assert_eq!(
            recorder.completed.borrow()[1],
            ("BTC-USD closes".to_string(), true)
        );
    }
}
