//! TreasuryLab Runner: pipeline orchestration, persistence, analysis, charts.
//!
//! This crate builds on `treasurylab-core` to provide:
//! - TOML pipeline configuration with CLI-overridable defaults
//! - Acquisition from the cached market-data provider and local records
//! - CSV persistence of the daily and resampled tables, plus a run manifest
//! - Returns analysis (cumulative, rolling beta/volatility/correlation/Sharpe)
//! - SVG chart rendering with per-chart failure isolation

pub mod analysis;
pub mod config;
pub mod export;
pub mod pipeline;
pub mod render;

pub use analysis::{run_analysis, AnalysisError, AnalysisOptions, AnalysisReport, AnalysisSummary};
pub use config::{ConfigError, PipelineConfig};
pub use export::{load_manifest, read_table_csv, RunManifest};
pub use pipeline::{
    acquire_sources, build_tables, prepare_provider, run_pipeline, AcquiredInputs, PipelineError,
    PipelineReport, PipelineTables,
};
pub use render::{render_catalog, treasury_catalog, ChartSpec, RenderError, RenderReport};
