//! Data acquisition: market-data providers, local CSV records and the Parquet
//! provider cache.

pub mod cache;
pub mod fetch;
pub mod provider;
pub mod records;
pub mod yahoo;

pub use cache::{CacheMeta, CacheStatus, CachedProvider, CoverageResult, ParquetCache};
pub use fetch::{download_market_data, FetchRequest, FetchSummary};
pub use provider::{
    BalanceSheet, DataError, FetchProgress, LogProgress, MarketDataProvider, StaticProvider,
};
pub use records::{parse_date, read_record, read_record_from, RecordError};
pub use yahoo::YahooProvider;
