//! Returns analysis over a persisted daily table.

use chrono::NaiveDate;
use std::path::PathBuf;
use treasurylab_core::data::{BalanceSheet, StaticProvider};
use treasurylab_core::series::TimeSeries;
use treasurylab_runner::pipeline::run_pipeline;
use treasurylab_runner::{run_analysis, AnalysisOptions, AnalysisSummary, PipelineConfig};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn closes(prices: &[f64]) -> TimeSeries {
    TimeSeries::from_points(
        "Close",
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| (d("2024-01-01") + chrono::Duration::days(i as i64), *p)),
    )
}

fn persisted_daily_table(dir: &std::path::Path) -> PathBuf {
    let mut sheet = BalanceSheet::new("MSTR");
    sheet.insert("Total Assets", d("2023-12-31"), 5_000.0);
    sheet.insert("Total Liabilities Net Minority Interest", d("2023-12-31"), 2_000.0);
    let provider = StaticProvider::new()
        .with_closes(
            "MSTR",
            closes(&[600.0, 630.0, 610.0, 650.0, 640.0, 700.0, 690.0, 720.0, 680.0, 710.0]),
        )
        .with_closes(
            "BTC-USD",
            closes(&[
                42_000.0, 43_000.0, 42_500.0, 44_000.0, 43_800.0, 45_000.0, 44_600.0, 46_000.0,
                45_500.0, 46_200.0,
            ]),
        )
        .with_shares("MSTR", 1.0)
        .with_balance_sheet(sheet);

    let mut config = PipelineConfig::default();
    config.market.start = d("2024-01-01");
    config.market.end = Some(d("2024-01-10"));
    config.sources.holdings = fixture("holdings.csv");
    config.sources.supplementary = Some(fixture("supplementary.csv"));
    config.output.dir = dir.to_path_buf();
    run_pipeline(&config, &provider).unwrap().daily_path
}

#[test]
fn analysis_writes_summary_and_charts() {
    let dir = tempfile::tempdir().unwrap();
    let daily = persisted_daily_table(dir.path());
    let out = dir.path().join("analysis");
    let opts = AnalysisOptions {
        window: 3,
        benchmark_label: "SP500".into(),
        ..AnalysisOptions::default()
    };

    let report = run_analysis(&daily, Some(fixture("benchmark.csv").as_path()), &opts, &out).unwrap();

    let series = |name: &str| {
        report
            .summary
            .series
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no summary for {name}"))
    };
    assert_eq!(report.summary.series.len(), 3);
    assert_eq!(report.summary.benchmark.as_deref(), Some("SP500"));
    assert_eq!(report.summary.observations, 9);
    assert!(series("MSTR").beta.is_some());
    assert!(series("BTC-USD").beta.is_some());
    assert!(series("SP500").beta.is_none());
    assert!(report.summary.series.iter().all(|s| s.max_drawdown <= 0.0));

    let json = std::fs::read_to_string(&report.summary_path).unwrap();
    let parsed: AnalysisSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.series.len(), 3);

    assert!(report.charts.all_succeeded(), "failures: {:?}", report.charts.failed);
    for file in [
        "cumulative_returns_log.svg",
        "rolling_beta.svg",
        "rolling_volatility.svg",
        "rolling_correlation.svg",
        "rolling_sharpe_ratio.svg",
    ] {
        assert!(out.join(file).exists(), "{file} missing");
    }
}

#[test]
fn analysis_without_benchmark_skips_beta() {
    let dir = tempfile::tempdir().unwrap();
    let daily = persisted_daily_table(dir.path());
    let out = dir.path().join("analysis");
    let opts = AnalysisOptions {
        window: 3,
        ..AnalysisOptions::default()
    };

    let report = run_analysis(&daily, None, &opts, &out).unwrap();

    assert_eq!(report.summary.benchmark, None);
    assert!(report.summary.series.iter().all(|s| s.beta.is_none()));
    assert_eq!(report.charts.rendered.len(), 4);
    assert!(!out.join("rolling_beta.svg").exists());
}
