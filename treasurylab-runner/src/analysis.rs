//! Returns analysis over the persisted daily table.
//!
//! Computes daily percent-change returns for the close columns (plus an
//! optional benchmark), then:
//! - cumulative returns `prod(1 + r)`
//! - rolling beta, volatility, pairwise correlation and Sharpe ratio
//! - a whole-period summary per series
//!
//! Statistics use sample (n - 1) variance. Annualization assumes 252 trading
//! days. A rolling window with fewer than `window` rows yields null.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use treasurylab_core::data::read_record;
use treasurylab_core::series::TimeSeries;
use treasurylab_core::table::{Table, TableColumn, TableError};

use crate::export::{self, read_table_csv};
use crate::render::{render_jobs, ChartJob, ChartKind, ChartSpec, LineChart, RenderReport};

pub const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no return series selected")]
    NoSeries,

    #[error("only {rows} complete return rows; need at least 2")]
    TooFewRows { rows: usize },

    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Rolling window length in rows.
    pub window: usize,
    /// Annual risk-free rate for Sharpe ratios.
    pub risk_free_rate: f64,
    /// Name given to the benchmark series.
    pub benchmark_label: String,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window: 90,
            risk_free_rate: 0.02,
            benchmark_label: "Benchmark".into(),
        }
    }
}

/// Aligned daily returns. Every series has one value per date.
#[derive(Debug, Clone, PartialEq)]
pub struct Returns {
    pub dates: Vec<NaiveDate>,
    pub names: Vec<String>,
    pub values: Vec<Vec<f64>>,
    /// Index of the benchmark series in `names`, if any.
    pub benchmark: Option<usize>,
}

impl Returns {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    fn benchmark_values(&self) -> Option<&[f64]> {
        self.benchmark.map(|i| self.values[i].as_slice())
    }

    /// Series other than the benchmark.
    fn assets(&self) -> impl Iterator<Item = (&str, &[f64])> + '_ {
        self.names
            .iter()
            .zip(&self.values)
            .enumerate()
            .filter(move |(i, _)| Some(*i) != self.benchmark)
            .map(|(_, (n, v))| (n.as_str(), v.as_slice()))
    }
}

// ─── Elementwise helpers ────────────────────────────────────────────

/// Carry the last value forward over nulls.
pub fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// `v[t] / v[t - periods] - 1`; null when either side is null or the base is zero.
pub fn pct_change_periods(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let prev = i.checked_sub(periods).and_then(|j| values[j])?;
            let cur = values[i]?;
            if prev == 0.0 {
                return None;
            }
            Some(cur / prev - 1.0).filter(|r| r.is_finite())
        })
        .collect()
}

pub fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    pct_change_periods(values, 1)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_cov(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || a.len() != b.len() {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
    Some(sum / (a.len() - 1) as f64)
}

fn sample_var(a: &[f64]) -> Option<f64> {
    sample_cov(a, a)
}

fn sample_std(a: &[f64]) -> Option<f64> {
    sample_var(a).map(f64::sqrt)
}

fn finite(v: f64) -> Option<f64> {
    Some(v).filter(|v| v.is_finite())
}

fn beta(asset: &[f64], market: &[f64]) -> Option<f64> {
    let var = sample_var(market)?;
    if var == 0.0 {
        return None;
    }
    finite(sample_cov(asset, market)? / var)
}

fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let denom = (sample_var(a)? * sample_var(b)?).sqrt();
    if denom == 0.0 {
        return None;
    }
    finite(sample_cov(a, b)? / denom)
}

fn volatility(r: &[f64]) -> Option<f64> {
    finite(sample_std(r)? * TRADING_DAYS.sqrt())
}

fn sharpe(r: &[f64], risk_free_rate: f64) -> Option<f64> {
    let daily_rf = risk_free_rate / TRADING_DAYS;
    let excess: Vec<f64> = r.iter().map(|x| x - daily_rf).collect();
    let sd = sample_std(&excess)?;
    if sd == 0.0 {
        return None;
    }
    finite(TRADING_DAYS.sqrt() * mean(&excess) / sd)
}

// ─── Rolling windows ────────────────────────────────────────────────

/// Apply `f` to each trailing window of `window` rows.
pub fn rolling(values: &[f64], window: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                f(&values[i + 1 - window..=i])
            }
        })
        .collect()
}

fn rolling_pair(
    a: &[f64],
    b: &[f64],
    window: usize,
    f: impl Fn(&[f64], &[f64]) -> Option<f64>,
) -> Vec<Option<f64>> {
    (0..a.len().min(b.len()))
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                let range = i + 1 - window..i + 1;
                f(&a[range.clone()], &b[range])
            }
        })
        .collect()
}

pub fn rolling_volatility(r: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(r, window, volatility)
}

pub fn rolling_sharpe(r: &[f64], window: usize, risk_free_rate: f64) -> Vec<Option<f64>> {
    rolling(r, window, |w| sharpe(w, risk_free_rate))
}

pub fn rolling_beta(asset: &[f64], market: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_pair(asset, market, window, beta)
}

pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_pair(a, b, window, correlation)
}

// ─── Whole-period statistics ────────────────────────────────────────

/// Running product of `1 + r`.
pub fn cumulative(r: &[f64]) -> Vec<f64> {
    let mut acc = 1.0;
    r.iter()
        .map(|x| {
            acc *= 1.0 + x;
            acc
        })
        .collect()
}

/// Largest peak-to-trough decline of the cumulative curve, as a negative fraction.
pub fn max_drawdown(r: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for value in cumulative(r) {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.min((value - peak) / peak);
        }
    }
    worst
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub name: String,
    /// `(1 + mean daily return)^252 - 1`.
    pub annualized_return: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    /// Against the benchmark; absent without one.
    pub beta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub observations: usize,
    pub window: usize,
    pub risk_free_rate: f64,
    pub benchmark: Option<String>,
    pub series: Vec<SeriesSummary>,
}

pub fn summarize(returns: &Returns, opts: &AnalysisOptions) -> AnalysisSummary {
    let market = returns.benchmark_values();
    let series = returns
        .names
        .iter()
        .zip(&returns.values)
        .enumerate()
        .map(|(i, (name, r))| SeriesSummary {
            name: name.clone(),
            annualized_return: (!r.is_empty())
                .then(|| (1.0 + mean(r)).powf(TRADING_DAYS) - 1.0)
                .and_then(finite),
            annualized_volatility: volatility(r),
            sharpe_ratio: sharpe(r, opts.risk_free_rate),
            max_drawdown: max_drawdown(r),
            beta: market
                .filter(|_| Some(i) != returns.benchmark)
                .and_then(|m| beta(r, m)),
        })
        .collect();

    AnalysisSummary {
        start: returns.dates.first().copied(),
        end: returns.dates.last().copied(),
        observations: returns.len(),
        window: opts.window,
        risk_free_rate: opts.risk_free_rate,
        benchmark: returns.benchmark.map(|i| returns.names[i].clone()),
        series,
    }
}

// ─── Building returns from the daily table ──────────────────────────

/// Close columns of a daily table, labeled by symbol: `MSTR_Close` -> `MSTR`.
pub fn close_columns(table: &Table) -> Vec<(String, String)> {
    table
        .column_names()
        .into_iter()
        .filter_map(|name| {
            name.strip_suffix("_Close")
                .map(|label| (label.to_string(), name.to_string()))
        })
        .collect()
}

/// Daily returns for `columns` (label, column) and an optional benchmark.
///
/// Prices are forward-filled before differencing, so a missing benchmark
/// quote on a weekend compares Monday with Friday. Rows where any series
/// still lacks a return are dropped.
pub fn daily_returns(
    table: &Table,
    columns: &[(String, String)],
    benchmark: Option<(&str, &TimeSeries)>,
) -> Result<Returns, AnalysisError> {
    let mut names = Vec::new();
    let mut changes: Vec<Vec<Option<f64>>> = Vec::new();
    for (label, column) in columns {
        let prices = &table.require(column)?.values;
        names.push(label.clone());
        changes.push(pct_change(&forward_fill(prices)));
    }
    let benchmark_idx = benchmark.map(|(label, series)| {
        let prices: Vec<Option<f64>> = table.dates().iter().map(|d| series.get(*d)).collect();
        names.push(label.to_string());
        changes.push(pct_change(&forward_fill(&prices)));
        names.len() - 1
    });
    if names.is_empty() {
        return Err(AnalysisError::NoSeries);
    }

    let mut dates = Vec::new();
    let mut values = vec![Vec::new(); names.len()];
    for (row, date) in table.dates().iter().enumerate() {
        let Some(row_values) = changes.iter().map(|c| c[row]).collect::<Option<Vec<f64>>>() else {
            continue;
        };
        dates.push(*date);
        for (series, v) in values.iter_mut().zip(row_values) {
            series.push(v);
        }
    }
    if dates.len() < 2 {
        return Err(AnalysisError::TooFewRows { rows: dates.len() });
    }

    Ok(Returns {
        dates,
        names,
        values,
        benchmark: benchmark_idx,
    })
}

// ─── Chart tables ───────────────────────────────────────────────────

/// One table per analysis chart, keyed by return date.
#[derive(Debug, Clone)]
pub struct AnalysisTables {
    pub cumulative: Table,
    pub rolling_beta: Option<Table>,
    pub rolling_volatility: Table,
    pub rolling_correlation: Table,
    pub rolling_sharpe: Table,
}

fn build_table(dates: &[NaiveDate], columns: Vec<(String, Vec<Option<f64>>)>) -> Result<Table, TableError> {
    columns
        .into_iter()
        .try_fold(Table::new(dates.to_vec())?, |t, (name, values)| {
            t.with_column(TableColumn::new(name, values))
        })
}

pub fn analysis_tables(returns: &Returns, opts: &AnalysisOptions) -> Result<AnalysisTables, AnalysisError> {
    let w = opts.window;
    let all = || returns.names.iter().zip(&returns.values);

    let cumulative = build_table(
        &returns.dates,
        all()
            .map(|(n, r)| (n.clone(), cumulative(r).into_iter().map(Some).collect()))
            .collect(),
    )?;

    let rolling_beta = match returns.benchmark_values() {
        Some(market) => Some(build_table(
            &returns.dates,
            returns
                .assets()
                .map(|(n, r)| (n.to_string(), rolling_beta(r, market, w)))
                .collect(),
        )?),
        None => None,
    };

    let rolling_volatility = build_table(
        &returns.dates,
        all().map(|(n, r)| (n.clone(), rolling_volatility(r, w))).collect(),
    )?;

    let mut pairs = Vec::new();
    for i in 0..returns.names.len() {
        for j in i + 1..returns.names.len() {
            pairs.push((
                format!("{} vs {}", returns.names[i], returns.names[j]),
                rolling_correlation(&returns.values[i], &returns.values[j], w),
            ));
        }
    }
    let rolling_correlation = build_table(&returns.dates, pairs)?;

    let rolling_sharpe = build_table(
        &returns.dates,
        all()
            .map(|(n, r)| (n.clone(), rolling_sharpe(r, w, opts.risk_free_rate)))
            .collect(),
    )?;

    Ok(AnalysisTables {
        cumulative,
        rolling_beta,
        rolling_volatility,
        rolling_correlation,
        rolling_sharpe,
    })
}

fn lines_for(table: &Table, y_label: &str) -> LineChart {
    LineChart::new(&table.column_names(), y_label)
}

/// Chart specs paired with the table each one draws.
pub fn analysis_charts<'a>(
    tables: &'a AnalysisTables,
    opts: &AnalysisOptions,
) -> Vec<(&'a Table, ChartSpec)> {
    let w = opts.window;
    let mut charts = vec![(
        &tables.cumulative,
        ChartSpec::new(
            "cumulative_returns_log.svg",
            "Cumulative Returns (Log Scale)",
            ChartKind::Lines(lines_for(&tables.cumulative, "Cumulative Returns (log scale)").log_scale()),
        ),
    )];
    if let Some(beta) = &tables.rolling_beta {
        charts.push((
            beta,
            ChartSpec::new(
                "rolling_beta.svg",
                &format!("{w}-Day Rolling Beta (vs {})", opts.benchmark_label),
                ChartKind::Lines(lines_for(beta, "Beta").with_range(-2.0, 6.0).with_reference(1.0)),
            ),
        ));
    }
    charts.push((
        &tables.rolling_volatility,
        ChartSpec::new(
            "rolling_volatility.svg",
            &format!("{w}-Day Rolling Volatility (Annualized)"),
            ChartKind::Lines(lines_for(&tables.rolling_volatility, "Volatility").with_range(0.0, 2.0)),
        ),
    ));
    charts.push((
        &tables.rolling_correlation,
        ChartSpec::new(
            "rolling_correlation.svg",
            &format!("{w}-Day Rolling Correlation"),
            ChartKind::Lines(lines_for(&tables.rolling_correlation, "Correlation").with_range(-1.0, 1.0)),
        ),
    ));
    charts.push((
        &tables.rolling_sharpe,
        ChartSpec::new(
            "rolling_sharpe_ratio.svg",
            &format!("{w}-Day Rolling Sharpe Ratio"),
            ChartKind::Lines(lines_for(&tables.rolling_sharpe, "Sharpe Ratio").with_range(-2.0, 6.0)),
        ),
    ));
    charts
}

// ─── Orchestration ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub summary: AnalysisSummary,
    pub summary_path: PathBuf,
    pub charts: RenderReport,
}

/// Read the daily table (and benchmark `Date, Close` CSV), write
/// `summary.json` and the analysis charts into `out_dir`.
pub fn run_analysis(
    input: &Path,
    benchmark: Option<&Path>,
    opts: &AnalysisOptions,
    out_dir: &Path,
) -> Result<AnalysisReport> {
    let table = read_table_csv(input)?;
    let columns = close_columns(&table);

    let benchmark_series = match benchmark {
        Some(path) => {
            let record = read_record(path, "benchmark", &["Close"])?;
            let close = record
                .get("Close")
                .cloned()
                .context("benchmark record has no Close series")?;
            Some(close)
        }
        None => None,
    };

    let returns = daily_returns(
        &table,
        &columns,
        benchmark_series
            .as_ref()
            .map(|s| (opts.benchmark_label.as_str(), s)),
    )?;
    tracing::info!(rows = returns.len(), series = ?returns.names, "computed daily returns");

    let summary = summarize(&returns, opts);
    let summary_path = out_dir.join("summary.json");
    export::write_json(&summary_path, &summary)?;

    let tables = analysis_tables(&returns, opts)?;
    let charts = analysis_charts(&tables, opts);
    let jobs: Vec<ChartJob<'_>> = charts
        .iter()
        .map(|(table, spec)| ChartJob { table, spec })
        .collect();
    let report = render_jobs(&jobs, out_dir);

    Ok(AnalysisReport {
        summary,
        summary_path,
        charts: report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pct_change_handles_gaps_and_zero_base() {
        let r = pct_change(&[Some(100.0), Some(110.0), None, Some(0.0), Some(5.0)]);
        assert_eq!(r[0], None);
        assert!(approx(r[1].unwrap(), 0.1));
        assert_eq!(r[2], None);
        assert_eq!(r[3], None);
        assert_eq!(r[4], None);
    }

    #[test]
    fn pct_change_over_periods() {
        let r = pct_change_periods(&[Some(100.0), Some(120.0), Some(150.0)], 2);
        assert_eq!(r, vec![None, None, Some(0.5)]);
    }

    #[test]
    fn rolling_needs_full_window() {
        let r = rolling_volatility(&[0.01, -0.02, 0.03, 0.01], 3);
        assert_eq!(r[0], None);
        assert_eq!(r[1], None);
        assert!(r[2].is_some());
        assert!(r[3].is_some());
    }

    #[test]
    fn self_correlation_is_one() {
        let a = [0.01, -0.02, 0.03, 0.015, -0.01];
        for v in rolling_correlation(&a, &a, 3).into_iter().flatten() {
            assert!(approx(v, 1.0));
        }
    }

    #[test]
    fn beta_of_scaled_series() {
        let market = [0.01, -0.02, 0.03, 0.015, -0.01];
        let asset: Vec<f64> = market.iter().map(|x| 2.0 * x).collect();
        let b = rolling_beta(&asset, &market, 5);
        assert!(approx(b[4].unwrap(), 2.0));
    }

    #[test]
    fn cumulative_and_drawdown() {
        let r = [0.1, -0.5, 0.2];
        let c = cumulative(&r);
        assert!(approx(c[2], 1.1 * 0.5 * 1.2));
        assert!(approx(max_drawdown(&r), -0.5));
    }

    #[test]
    fn daily_returns_drops_incomplete_rows_and_pads_benchmark() {
        let dates = vec![d("2024-01-05"), d("2024-01-06"), d("2024-01-07"), d("2024-01-08")];
        let table = Table::new(dates)
            .unwrap()
            .with_column(TableColumn::new(
                "MSTR_Close",
                vec![Some(10.0), Some(11.0), Some(11.0), Some(12.1)],
            ))
            .unwrap();
        // No weekend quotes for the benchmark.
        let bench = TimeSeries::from_points(
            "Close",
            vec![(d("2024-01-05"), 100.0), (d("2024-01-08"), 110.0)],
        );

        let columns = close_columns(&table);
        assert_eq!(columns, vec![("MSTR".to_string(), "MSTR_Close".to_string())]);
        let returns = daily_returns(&table, &columns, Some(("SP500", &bench))).unwrap();

        assert_eq!(returns.names, vec!["MSTR", "SP500"]);
        assert_eq!(returns.benchmark, Some(1));
        assert_eq!(returns.len(), 3);
        assert!(approx(returns.values[1][2], 0.1));
        assert_eq!(returns.values[1][0], 0.0);
    }

    #[test]
    fn summary_has_beta_only_for_assets() {
        let returns = Returns {
            dates: vec![d("2024-01-01"), d("2024-01-02"), d("2024-01-03")],
            names: vec!["A".into(), "M".into()],
            values: vec![vec![0.02, -0.04, 0.06], vec![0.01, -0.02, 0.03]],
            benchmark: Some(1),
        };
        let s = summarize(&returns, &AnalysisOptions::default());
        assert!(approx(s.series[0].beta.unwrap(), 2.0));
        assert_eq!(s.series[1].beta, None);
        assert_eq!(s.benchmark.as_deref(), Some("M"));
        assert_eq!(s.observations, 3);
    }

    #[test]
    fn beta_chart_only_with_benchmark() {
        let returns = Returns {
            dates: vec![d("2024-01-01"), d("2024-01-02")],
            names: vec!["A".into(), "B".into()],
            values: vec![vec![0.01, 0.02], vec![0.03, 0.01]],
            benchmark: None,
        };
        let opts = AnalysisOptions::default();
        let tables = analysis_tables(&returns, &opts).unwrap();
        assert!(tables.rolling_beta.is_none());
        assert_eq!(tables.rolling_correlation.column_names(), vec!["A vs B"]);

        let files: Vec<String> = analysis_charts(&tables, &opts)
            .into_iter()
            .map(|(_, spec)| spec.file)
            .collect();
        assert_eq!(files.len(), 4);
        assert!(!files.contains(&"rolling_beta.svg".to_string()));
    }
}
