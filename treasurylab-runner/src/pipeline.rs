//! The pipeline: acquire sources, align, derive, resample, persist.
//!
//! Acquisition talks to a `MarketDataProvider` and the local CSV records.
//! Everything after that (`build_tables`) is a pure function of the acquired
//! series, so the same inputs always produce the same tables.

use std::path::PathBuf;

use thiserror::Error;
use treasurylab_core::align::{align_sources, AlignOptions, FieldConflict};
use treasurylab_core::data::{
    download_market_data, read_record, CachedProvider, DataError, FetchProgress, FetchRequest,
    MarketDataProvider, ParquetCache, RecordError, YahooProvider,
};
use treasurylab_core::derive::{derive_metrics, DeriveError};
use treasurylab_core::resample::resample_mean;
use treasurylab_core::schema::{self, SchemaError};
use treasurylab_core::series::{SourceSeries, TimeSeries};
use treasurylab_core::table::Table;

use crate::config::{ConfigError, PipelineConfig};
use crate::export::{self, OutputFile, RunManifest, MANIFEST_VERSION};

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error("export failed: {0:#}")]
    Export(#[from] anyhow::Error),
}

/// Everything read from the outside world for one run.
#[derive(Debug, Clone)]
pub struct AcquiredInputs {
    /// In merge order: market closes, balance sheet, holdings, supplementary.
    pub sources: Vec<SourceSeries>,
    pub shares_outstanding: f64,
}

/// The in-memory result of a run.
#[derive(Debug, Clone)]
pub struct PipelineTables {
    pub daily: Table,
    pub resampled: Table,
    pub conflicts: Vec<FieldConflict>,
}

/// What a persisted run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub daily_path: PathBuf,
    pub resampled_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: RunManifest,
}

/// Pick the provider for a run.
///
/// Online runs download every series into the Parquet cache first; both
/// modes then read through the cache. A failed download is logged and the
/// previously cached copy, if any, is used.
pub fn prepare_provider(
    config: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<CachedProvider, PipelineError> {
    let cache = ParquetCache::new(&config.market.cache_dir);
    if config.market.offline {
        tracing::info!(cache_dir = %cache.cache_dir().display(), "offline: reading from cache only");
        return Ok(CachedProvider::new(cache));
    }

    let yahoo = YahooProvider::new()?;
    let summary = download_market_data(&yahoo, &cache, &fetch_request(config), progress);
    for (item, err) in &summary.errors {
        tracing::warn!(%item, error = %err, "download failed; falling back to cached copy");
    }
    Ok(CachedProvider::new(cache))
}

/// The download request implied by a config.
pub fn fetch_request(config: &PipelineConfig) -> FetchRequest {
    FetchRequest {
        ticker: config.market.ticker.clone(),
        reserve: config.market.reserve.clone(),
        start: config.market.start,
        end: config.end_date(),
        labels: config.schema.labels().into_iter().map(String::from).collect(),
    }
}

/// Read every input series the config names.
pub fn acquire_sources(
    config: &PipelineConfig,
    provider: &dyn MarketDataProvider,
) -> Result<AcquiredInputs, PipelineError> {
    let market = &config.market;
    let (start, end) = (market.start, config.end_date());

    let mut closes: Vec<TimeSeries> = Vec::with_capacity(2);
    for symbol in [&market.ticker, &market.reserve] {
        let series = provider.fetch_closes(symbol, start, end)?;
        tracing::info!(symbol = %symbol, rows = series.len(), provider = provider.name(), "closes");
        closes.push(series.renamed(schema::close_column(symbol)));
    }

    let shares_outstanding = match market.shares_outstanding {
        Some(shares) => {
            tracing::info!(shares, "using configured shares outstanding");
            shares
        }
        None => provider.shares_outstanding(&market.ticker)?,
    };

    let sheet = provider.balance_sheet(&market.ticker, &config.schema.labels())?;
    let filings = config.schema.resolve(&sheet)?;

    let holdings_column = config.holdings_column();
    let holdings = read_record(&config.sources.holdings, "holdings", &[holdings_column.as_str()])?;

    let mut sources = vec![
        SourceSeries::new(format!("{}:closes", provider.name()), closes),
        filings,
        holdings,
    ];
    if let Some(path) = &config.sources.supplementary {
        sources.push(read_record(path, "supplementary", &[])?);
    }

    Ok(AcquiredInputs {
        sources,
        shares_outstanding,
    })
}

/// Align, derive and resample. No I/O.
pub fn build_tables(
    inputs: &AcquiredInputs,
    config: &PipelineConfig,
) -> Result<PipelineTables, PipelineError> {
    let opts = AlignOptions {
        start: Some(config.market.start),
        end: config.market.end,
        conflict_policy: config.sources.conflict_policy,
    };
    let aligned = align_sources(&inputs.sources, &opts);
    tracing::info!(
        rows = aligned.table.height(),
        columns = aligned.table.width(),
        conflicts = aligned.conflicts.len(),
        "aligned sources"
    );

    let daily = derive_metrics(&aligned.table, &config.catalog(), inputs.shares_outstanding)?;
    let resampled = resample_mean(&daily, config.output.frequency);

    Ok(PipelineTables {
        daily,
        resampled,
        conflicts: aligned.conflicts,
    })
}

/// Daily table path: `{dir}/metrics_daily.csv`.
pub fn daily_path(config: &PipelineConfig) -> PathBuf {
    config.output.dir.join("metrics_daily.csv")
}

/// Resampled table path: `{dir}/metrics_{frequency}_avg.csv`.
pub fn resampled_path(config: &PipelineConfig) -> PathBuf {
    config
        .output
        .dir
        .join(format!("metrics_{}_avg.csv", config.output.frequency.label()))
}

/// Build and persist. The daily table is written first, the resampled table
/// second and the manifest last; a failure stops before anything later.
pub fn run_pipeline(
    config: &PipelineConfig,
    provider: &dyn MarketDataProvider,
) -> Result<PipelineReport, PipelineError> {
    let inputs = acquire_sources(config, provider)?;
    let tables = build_tables(&inputs, config)?;
    let catalog = config.catalog();

    let daily_path = daily_path(config);
    let daily_csv = export::table_to_csv(&tables.daily, &catalog, config.output.format)?;
    export::write_atomic(&daily_path, daily_csv.as_bytes())?;
    tracing::info!(path = %daily_path.display(), rows = tables.daily.height(), "wrote daily table");

    let resampled_path = resampled_path(config);
    let resampled_csv = export::table_to_csv(&tables.resampled, &catalog, config.output.format)?;
    export::write_atomic(&resampled_path, resampled_csv.as_bytes())?;
    tracing::info!(
        path = %resampled_path.display(),
        rows = tables.resampled.height(),
        "wrote resampled table"
    );

    let manifest = RunManifest {
        schema_version: MANIFEST_VERSION,
        config_hash: config.config_hash()?,
        ticker: config.market.ticker.clone(),
        reserve: config.market.reserve.clone(),
        shares_outstanding: inputs.shares_outstanding,
        conflicts: tables.conflicts.len(),
        outputs: vec![
            OutputFile::describe(&daily_path, &tables.daily, daily_csv.as_bytes()),
            OutputFile::describe(&resampled_path, &tables.resampled, resampled_csv.as_bytes()),
        ],
    };
    let manifest_path = config.output.dir.join("manifest.json");
    export::write_json(&manifest_path, &manifest)?;

    Ok(PipelineReport {
        daily_path,
        resampled_path,
        manifest_path,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use treasurylab_core::resample::Frequency;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn output_paths_follow_frequency() {
        let mut config = PipelineConfig::default();
        config.output.dir = PathBuf::from("out");
        assert_eq!(daily_path(&config), PathBuf::from("out/metrics_daily.csv"));
        assert_eq!(resampled_path(&config), PathBuf::from("out/metrics_monthly_avg.csv"));
        config.output.frequency = Frequency::Quarterly;
        assert_eq!(resampled_path(&config), PathBuf::from("out/metrics_quarterly_avg.csv"));
    }

    #[test]
    fn fetch_request_uses_schema_labels() {
        let mut config = PipelineConfig::default();
        config.market.end = Some(d("2024-12-31"));
        let req = fetch_request(&config);
        assert_eq!(req.ticker, "MSTR");
        assert_eq!(req.end, d("2024-12-31"));
        assert_eq!(req.labels.len(), 2);
    }

    #[test]
    fn build_tables_respects_start_bound() {
        let mut config = PipelineConfig::default();
        config.market.start = d("2021-01-01");
        config.derive.metrics = Some(treasurylab_core::derive::MetricCatalog { metrics: vec![] });

        let inputs = AcquiredInputs {
            sources: vec![SourceSeries::new(
                "holdings",
                vec![TimeSeries::from_points(
                    "Total_BTC",
                    vec![(d("2020-12-01"), 70.0), (d("2021-01-05"), 100.0)],
                )],
            )],
            shares_outstanding: 1.0,
        };
        let tables = build_tables(&inputs, &config).unwrap();

        assert_eq!(tables.daily.dates(), &[d("2021-01-05")]);
        assert_eq!(tables.resampled.dates(), &[d("2021-01-31")]);
    }
}
