//! TreasuryLab CLI: fetch, build, render, analyze, and cache commands.
//!
//! Commands:
//! - `fetch`: download closes, shares outstanding and balance sheet into the Parquet cache
//! - `build`: align, derive and resample into `metrics_daily.csv` / `metrics_*_avg.csv`
//! - `render`: draw the treasury chart catalog from a daily table
//! - `analyze`: returns analysis (cumulative, rolling stats, summary.json)
//! - `run`: build, then render
//! - `cache status`: report what the cache holds per symbol

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use treasurylab_core::data::{download_market_data, LogProgress, ParquetCache, YahooProvider};
use treasurylab_core::format::OutputFormat;
use treasurylab_core::resample::Frequency;
use treasurylab_runner::pipeline::{fetch_request, prepare_provider, run_pipeline, PipelineReport};
use treasurylab_runner::render::{render_catalog, treasury_catalog, RenderReport};
use treasurylab_runner::{read_table_csv, run_analysis, AnalysisOptions, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "treasurylab",
    about = "TreasuryLab CLI: corporate reserve-asset treasury metrics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that reads a pipeline config.
#[derive(Args, Debug, Clone, Default)]
struct MarketArgs {
    /// Path to a TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Company ticker (e.g., MSTR).
    #[arg(long)]
    ticker: Option<String>,

    /// Reserve asset pair (e.g., BTC-USD).
    #[arg(long)]
    reserve: Option<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct BuildArgs {
    #[command(flatten)]
    market: MarketArgs,

    /// Holdings record (`Date, Total_{asset}`).
    #[arg(long)]
    holdings: Option<PathBuf>,

    /// Supplementary filings record.
    #[arg(long)]
    supplementary: Option<PathBuf>,

    /// Read only from the cache; no network access.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Use this figure instead of the provider's shares outstanding.
    #[arg(long)]
    shares_outstanding: Option<f64>,

    /// Number format for persisted tables: raw or rounded.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Resample frequency: weekly, monthly, quarterly, yearly.
    #[arg(long)]
    frequency: Option<Frequency>,

    /// Output directory for the tables and manifest.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download market data into the Parquet cache.
    Fetch {
        #[command(flatten)]
        market: MarketArgs,
    },
    /// Build the daily and resampled metric tables.
    Build {
        #[command(flatten)]
        args: BuildArgs,
    },
    /// Render the chart catalog from a daily table.
    Render {
        #[command(flatten)]
        market: MarketArgs,

        /// Daily table written by `build`.
        #[arg(long, default_value = "output/metrics_daily.csv")]
        input: PathBuf,

        /// Directory for the SVG charts.
        #[arg(long, default_value = "output/plots")]
        output_dir: PathBuf,
    },
    /// Returns analysis over the daily table's close columns.
    Analyze {
        /// Daily table written by `build`.
        #[arg(long, default_value = "output/metrics_daily.csv")]
        input: PathBuf,

        /// Benchmark closes (`Date, Close` CSV).
        #[arg(long)]
        benchmark: Option<PathBuf>,

        /// Label for the benchmark series.
        #[arg(long, default_value = "SP500")]
        benchmark_label: String,

        /// Rolling window in rows.
        #[arg(long, default_value_t = 90)]
        window: usize,

        /// Annual risk-free rate for Sharpe ratios.
        #[arg(long, default_value_t = 0.02)]
        risk_free: f64,

        /// Directory for summary.json and charts.
        #[arg(long, default_value = "output/analysis")]
        output_dir: PathBuf,
    },
    /// Build the tables, then render the charts.
    Run {
        #[command(flatten)]
        args: BuildArgs,

        /// Directory for the SVG charts. Defaults to `{output_dir}/plots`.
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached date ranges and row counts per symbol.
    Status {
        #[command(flatten)]
        market: MarketArgs,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Fetch { market } => run_fetch(&market),
        Commands::Build { args } => build_config(&args)
            .and_then(|config| run_build(&config))
            .map(|report| print_build(&report)),
        Commands::Render {
            market,
            input,
            output_dir,
        } => load_config(&market).and_then(|config| run_render(&config, &input, &output_dir)),
        Commands::Analyze {
            input,
            benchmark,
            benchmark_label,
            window,
            risk_free,
            output_dir,
        } => {
            let opts = AnalysisOptions {
                window,
                risk_free_rate: risk_free,
                benchmark_label,
            };
            run_analyze(&input, benchmark.as_deref(), &opts, &output_dir)
        }
        Commands::Run { args, plot_dir } => run_all(&args, plot_dir),
        Commands::Cache { action } => match action {
            CacheAction::Status { market } => run_cache_status(&market),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load the config file (or defaults) and apply flag overrides.
fn load_config(market: &MarketArgs) -> Result<PipelineConfig> {
    let mut config = match &market.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(ticker) = &market.ticker {
        config.market.ticker = ticker.clone();
    }
    if let Some(reserve) = &market.reserve {
        config.market.reserve = reserve.clone();
    }
    if let Some(start) = market.start {
        config.market.start = start;
    }
    if market.end.is_some() {
        config.market.end = market.end;
    }
    if let Some(dir) = &market.cache_dir {
        config.market.cache_dir = dir.clone();
    }
    Ok(config)
}

fn build_config(args: &BuildArgs) -> Result<PipelineConfig> {
    let mut config = load_config(&args.market)?;
    if let Some(path) = &args.holdings {
        config.sources.holdings = path.clone();
    }
    if let Some(path) = &args.supplementary {
        config.sources.supplementary = Some(path.clone());
    }
    if args.offline {
        config.market.offline = true;
    }
    if args.shares_outstanding.is_some() {
        config.market.shares_outstanding = args.shares_outstanding;
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if let Some(frequency) = args.frequency {
        config.output.frequency = frequency;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run_fetch(market: &MarketArgs) -> Result<()> {
    let config = load_config(market)?;
    config.validate()?;

    let provider = YahooProvider::new()?;
    let cache = ParquetCache::new(&config.market.cache_dir);
    let request = fetch_request(&config);
    let summary = download_market_data(&provider, &cache, &request, &LogProgress);

    println!(
        "Fetched {}/{} items for {} / {} into {}",
        summary.succeeded,
        summary.total,
        request.ticker,
        request.reserve,
        cache.cache_dir().display()
    );
    if !summary.all_succeeded() {
        for (item, err) in &summary.errors {
            eprintln!("Error for {item}: {err}");
        }
        bail!("{} of {} downloads failed", summary.failed(), summary.total);
    }
    Ok(())
}

fn run_build(config: &PipelineConfig) -> Result<PipelineReport> {
    let provider = prepare_provider(config, &LogProgress)?;
    Ok(run_pipeline(config, &provider)?)
}

fn print_build(report: &PipelineReport) {
    println!("Shares outstanding: {}", report.manifest.shares_outstanding);
    if report.manifest.conflicts > 0 {
        println!("Source conflicts:   {}", report.manifest.conflicts);
    }
    for output in &report.manifest.outputs {
        println!(
            "  {:<32} {:>6} rows {:>3} cols  blake3 {}",
            output.file,
            output.rows,
            output.columns,
            &output.blake3[..12.min(output.blake3.len())]
        );
    }
    println!("Manifest: {}", report.manifest_path.display());
}

fn check_charts(report: &RenderReport, out_dir: &Path) -> Result<()> {
    println!("Rendered {} charts into {}", report.rendered.len(), out_dir.display());
    if !report.all_succeeded() {
        for failure in &report.failed {
            eprintln!("Chart {} failed: {}", failure.file, failure.error);
        }
        bail!("{} charts failed", report.failed.len());
    }
    Ok(())
}

fn run_render(config: &PipelineConfig, input: &Path, out_dir: &Path) -> Result<()> {
    let table = read_table_csv(input)?;
    let catalog = treasury_catalog(&config.market.ticker, &config.market.reserve);
    let report = render_catalog(&table, &catalog, out_dir);
    check_charts(&report, out_dir)
}

fn run_analyze(
    input: &Path,
    benchmark: Option<&Path>,
    opts: &AnalysisOptions,
    out_dir: &Path,
) -> Result<()> {
    let report = run_analysis(input, benchmark, opts, out_dir)?;

    let s = &report.summary;
    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into());
    println!(
        "Returns {} to {} ({} observations, {}-day window)",
        s.start.map(|d| d.to_string()).unwrap_or_default(),
        s.end.map(|d| d.to_string()).unwrap_or_default(),
        s.observations,
        s.window
    );
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Series", "Ann.Ret", "Ann.Vol", "Sharpe", "MaxDD", "Beta"
    );
    println!("{}", "-".repeat(67));
    for series in &s.series {
        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>10.4} {:>10}",
            series.name,
            fmt(series.annualized_return),
            fmt(series.annualized_volatility),
            fmt(series.sharpe_ratio),
            series.max_drawdown,
            fmt(series.beta)
        );
    }
    println!("Summary: {}", report.summary_path.display());
    check_charts(&report.charts, out_dir)
}

fn run_all(args: &BuildArgs, plot_dir: Option<PathBuf>) -> Result<()> {
    let config = build_config(args)?;
    let report = run_build(&config)?;
    print_build(&report);

    let plot_dir = plot_dir.unwrap_or_else(|| config.output.dir.join("plots"));
    run_render(&config, &report.daily_path, &plot_dir)
}

fn run_cache_status(market: &MarketArgs) -> Result<()> {
    let config = load_config(market)?;
    let cache = ParquetCache::new(&config.market.cache_dir);
    if !cache.cache_dir().exists() {
        println!("Cache directory does not exist: {}", cache.cache_dir().display());
        return Ok(());
    }

    let symbols = [config.market.ticker.as_str(), config.market.reserve.as_str()];
    println!("Cache: {}", cache.cache_dir().display());
    println!();
    println!(
        "{:<10} {:<25} {:>8} {:>8} {:>16}",
        "Symbol", "Close Range", "Closes", "BS Rows", "Shares"
    );
    println!("{}", "-".repeat(71));
    for status in cache.status(&symbols) {
        if !status.cached {
            println!("{:<10} (not cached)", status.symbol);
            continue;
        }
        let range = match (status.close_start, status.close_end) {
            (Some(s), Some(e)) => format!("{s} to {e}"),
            _ => "(no closes)".into(),
        };
        println!(
            "{:<10} {:<25} {:>8} {:>8} {:>16}",
            status.symbol,
            range,
            status.close_count.unwrap_or_default(),
            status.balance_sheet_rows.unwrap_or_default(),
            status
                .shares_outstanding
                .map(|s| format!("{s:.0}"))
                .unwrap_or_else(|| "-".into())
        );
    }
    Ok(())
}
