//! Chart rendering.
//!
//! A chart is a `ChartSpec` (file name, title, what to draw) applied to one
//! table. Rendering is a pure consumer of the table: a missing column fails
//! that chart only, and `render_jobs` keeps going so one bad chart never
//! blocks the rest of the catalog.
//!
//! Charts are SVG files drawn with `plotters`.

mod dual_axis;
mod line;
mod scatter;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use treasurylab_core::schema;
use treasurylab_core::table::Table;

/// Chart canvas size in pixels.
pub const CHART_SIZE: (u32, u32) = (1200, 600);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("chart '{chart}' needs column '{column}', which the table does not have")]
    MissingColumn { chart: String, column: String },

    #[error("chart '{chart}' has no plottable values")]
    NoData { chart: String },

    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("drawing failed: {0}")]
    Draw(String),
}

pub(crate) fn draw_err<E: Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

/// What to draw.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartKind {
    /// One line per column over time.
    Lines(LineChart),
    /// x vs y points colored by calendar year, with a 1:1 diagonal.
    YearScatter(ScatterChart),
    /// Net value to holdings ratio (left) and holdings YoY change (right).
    NetValueDualAxis(NetValueChart),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineChart {
    pub columns: Vec<String>,
    pub y_label: String,
    pub log_y: bool,
    /// Fixed y-range; fitted to the data when absent.
    pub y_range: Option<(f64, f64)>,
    /// Horizontal reference line.
    pub reference: Option<f64>,
}

impl LineChart {
    pub fn new(columns: &[&str], y_label: &str) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            y_label: y_label.to_string(),
            log_y: false,
            y_range: None,
            reference: None,
        }
    }

    pub fn log_scale(mut self) -> Self {
        self.log_y = true;
        self
    }

    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.y_range = Some((lo, hi));
        self
    }

    pub fn with_reference(mut self, y: f64) -> Self {
        self.reference = Some(y);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterChart {
    pub x: String,
    pub y: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetValueChart {
    pub market_cap: String,
    pub liabilities: String,
    pub holdings_value: String,
    pub holdings: String,
    /// Rows between the two holdings figures compared for YoY change.
    pub yoy_periods: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub file: String,
    pub title: String,
    pub kind: ChartKind,
}

impl ChartSpec {
    pub fn new(file: &str, title: &str, kind: ChartKind) -> Self {
        Self {
            file: file.to_string(),
            title: title.to_string(),
            kind,
        }
    }

    /// Every column this chart reads.
    pub fn columns(&self) -> Vec<&str> {
        match &self.kind {
            ChartKind::Lines(c) => c.columns.iter().map(String::as_str).collect(),
            ChartKind::YearScatter(c) => vec![c.x.as_str(), c.y.as_str()],
            ChartKind::NetValueDualAxis(c) => vec![
                c.market_cap.as_str(),
                c.liabilities.as_str(),
                c.holdings_value.as_str(),
                c.holdings.as_str(),
            ],
        }
    }
}

/// The treasury chart catalog for a company and its reserve asset.
pub fn treasury_catalog(company: &str, reserve: &str) -> Vec<ChartSpec> {
    let asset = schema::reserve_asset(reserve);
    let market_cap = schema::market_cap_column(company);
    let holdings_value = schema::holdings_value_column(asset);
    let holdings = schema::holdings_column(asset);
    let to_market_cap = schema::holdings_to_market_cap_column(asset);
    let to_net_assets = schema::holdings_to_net_assets_column(asset);

    vec![
        ChartSpec::new(
            &format!("{}_holdings_vs_market_cap.svg", asset.to_lowercase()),
            &format!("{asset} Holdings Value vs {company} Market Cap"),
            ChartKind::Lines(LineChart::new(&[&holdings_value, &market_cap], "USD")),
        ),
        ChartSpec::new(
            &format!("{}_to_market_cap_ratio.svg", asset.to_lowercase()),
            &format!("{asset} Holdings to Market Cap Ratio"),
            ChartKind::Lines(LineChart::new(&[&to_market_cap], "Ratio")),
        ),
        ChartSpec::new(
            "financial_leverage_ratio.svg",
            "Financial Leverage Ratio",
            ChartKind::Lines(LineChart::new(&[schema::FINANCIAL_LEVERAGE], "Ratio")),
        ),
        ChartSpec::new(
            &format!("{}_to_net_assets_ratio.svg", asset.to_lowercase()),
            &format!("{asset} Holdings to Net Assets Ratio"),
            ChartKind::Lines(LineChart::new(&[&to_net_assets], "Ratio")),
        ),
        ChartSpec::new(
            "financial_metrics.svg",
            "Key Financial Metrics Over Time",
            ChartKind::Lines(LineChart::new(
                &[
                    &market_cap,
                    &holdings_value,
                    schema::TOTAL_LIABILITIES,
                    schema::GROSS_PROFIT,
                ],
                "USD",
            )),
        ),
        ChartSpec::new(
            &format!("total_{}_holdings.svg", asset.to_lowercase()),
            &format!("Total {asset} Holdings Over Time"),
            ChartKind::Lines(LineChart::new(&[&holdings], asset)),
        ),
        ChartSpec::new(
            "bitcoin_vs_market_cap.svg",
            &format!("{asset} Holdings vs Market Cap"),
            ChartKind::YearScatter(ScatterChart {
                x: holdings_value.clone(),
                y: market_cap.clone(),
            }),
        ),
        ChartSpec::new(
            "market_cap_vs_liabilities.svg",
            "Market Cap vs Total Liabilities",
            ChartKind::YearScatter(ScatterChart {
                x: schema::TOTAL_LIABILITIES.to_string(),
                y: market_cap.clone(),
            }),
        ),
        ChartSpec::new(
            "net_value_dual_axis.svg",
            &format!("Net Value (Market Cap - Liabilities) to {asset} Ratio & Holdings YoY Change"),
            ChartKind::NetValueDualAxis(NetValueChart {
                market_cap,
                liabilities: schema::TOTAL_LIABILITIES.to_string(),
                holdings_value,
                holdings,
                yoy_periods: 365,
            }),
        ),
    ]
}

/// One chart bound to the table it draws from.
#[derive(Debug, Clone, Copy)]
pub struct ChartJob<'a> {
    pub table: &'a Table,
    pub spec: &'a ChartSpec,
}

/// A chart that failed to render.
#[derive(Debug, Clone, Serialize)]
pub struct ChartFailure {
    pub file: String,
    pub error: String,
}

/// Which charts were written and which failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderReport {
    pub rendered: Vec<PathBuf>,
    pub failed: Vec<ChartFailure>,
}

impl RenderReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Render one chart into `out_dir`.
pub fn render_chart(table: &Table, spec: &ChartSpec, out_dir: &Path) -> Result<PathBuf, RenderError> {
    for column in spec.columns() {
        if table.column(column).is_none() {
            return Err(RenderError::MissingColumn {
                chart: spec.file.clone(),
                column: column.to_string(),
            });
        }
    }
    std::fs::create_dir_all(out_dir).map_err(|e| RenderError::Io {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let path = out_dir.join(&spec.file);
    match &spec.kind {
        ChartKind::Lines(c) => line::draw(table, spec, c, &path)?,
        ChartKind::YearScatter(c) => scatter::draw(table, spec, c, &path)?,
        ChartKind::NetValueDualAxis(c) => dual_axis::draw(table, spec, c, &path)?,
    }
    Ok(path)
}

/// Render each job in isolation and report the outcome of every one.
pub fn render_jobs(jobs: &[ChartJob<'_>], out_dir: &Path) -> RenderReport {
    let mut report = RenderReport::default();
    for job in jobs {
        match render_chart(job.table, job.spec, out_dir) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "rendered chart");
                report.rendered.push(path);
            }
            Err(e) => {
                tracing::error!(chart = %job.spec.file, error = %e, "chart failed");
                report.failed.push(ChartFailure {
                    file: job.spec.file.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    report
}

/// Render a whole catalog from one table.
pub fn render_catalog(table: &Table, specs: &[ChartSpec], out_dir: &Path) -> RenderReport {
    let jobs: Vec<ChartJob<'_>> = specs.iter().map(|spec| ChartJob { table, spec }).collect();
    render_jobs(&jobs, out_dir)
}

// ── Shared drawing helpers ──────────────────────────────────────────

/// Dates map to the x axis as days since the common era.
pub(crate) fn date_to_x(date: NaiveDate) -> f64 {
    f64::from(date.num_days_from_ce())
}

pub(crate) fn x_to_label(x: &f64) -> String {
    NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
        .map(|d| d.format("%Y-%m").to_string())
        .unwrap_or_default()
}

/// x extent of a table, widened to one day for a single row.
pub(crate) fn x_range(table: &Table, chart: &str) -> Result<std::ops::Range<f64>, RenderError> {
    let (Some(first), Some(last)) = (table.dates().first(), table.dates().last()) else {
        return Err(RenderError::NoData {
            chart: chart.to_string(),
        });
    };
    let (lo, hi) = (date_to_x(*first), date_to_x(*last));
    Ok(if hi > lo { lo..hi } else { lo - 1.0..hi + 1.0 })
}

/// Contiguous runs of non-null values, so gaps are drawn as breaks.
pub(crate) fn segments(dates: &[NaiveDate], values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut out: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current = Vec::new();
    for (date, value) in dates.iter().zip(values) {
        match value {
            Some(v) if v.is_finite() => current.push((date_to_x(*date), *v)),
            _ => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Padded extent of every finite value, or `None` if there are none.
pub(crate) fn fit_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if lo > hi {
        return None;
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return Some((lo - pad, hi + pad));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use treasurylab_core::table::TableColumn;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn catalog_has_nine_charts_with_unique_files() {
        let catalog = treasury_catalog("MSTR", "BTC-USD");
        assert_eq!(catalog.len(), 9);
        let mut files: Vec<_> = catalog.iter().map(|c| c.file.as_str()).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 9);
        assert!(files.contains(&"btc_holdings_vs_market_cap.svg"));
        assert!(files.contains(&"total_btc_holdings.svg"));
    }

    #[test]
    fn segments_break_on_nulls() {
        let dates = [d("2024-01-01"), d("2024-01-02"), d("2024-01-03"), d("2024-01-04")];
        let segs = segments(&dates, &[Some(1.0), None, Some(2.0), Some(f64::NAN)]);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].len(), 1);
        assert_eq!(segs[1][0].1, 2.0);
    }

    #[test]
    fn fit_range_pads() {
        assert_eq!(fit_range(&[0.0, 10.0]), Some((-0.5, 10.5)));
        assert_eq!(fit_range(&[0.0]), Some((-1.0, 1.0)));
        assert_eq!(fit_range(&[f64::NAN]), None);
    }

    #[test]
    fn x_axis_round_trips_dates() {
        let x = date_to_x(d("2024-03-15"));
        assert_eq!(x_to_label(&x), "2024-03");
    }

    #[test]
    fn missing_column_fails_that_chart_only() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::new(vec![d("2024-01-01"), d("2024-01-02")])
            .unwrap()
            .with_column(TableColumn::new("A", vec![Some(1.0), Some(2.0)]))
            .unwrap();
        let specs = vec![
            ChartSpec::new("bad.svg", "Bad", ChartKind::Lines(LineChart::new(&["Nope"], "y"))),
            ChartSpec::new("good.svg", "Good", ChartKind::Lines(LineChart::new(&["A"], "y"))),
        ];

        let report = render_catalog(&table, &specs, dir.path());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file, "bad.svg");
        assert!(report.failed[0].error.contains("Nope"));
        assert_eq!(report.rendered, vec![dir.path().join("good.svg")]);
        assert!(dir.path().join("good.svg").exists());
    }
}
