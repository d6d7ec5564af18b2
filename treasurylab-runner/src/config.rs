//! Serializable pipeline configuration.
//!
//! One `PipelineConfig` describes a whole run: which symbols to pull, which
//! local records to merge, how balance-sheet labels map to fields, which
//! metrics to derive and how to persist them. CLI flags override file values.
//!
//! ```toml
//! [market]
//! ticker = "MSTR"
//! reserve = "BTC-USD"
//! start = "2020-03-01"
//!
//! [sources]
//! holdings = "data/btc_holdings.csv"
//! supplementary = "data/supplementary_financials.csv"
//! conflict_policy = "last_source_wins"
//!
//! [[schema.balance_sheet]]
//! field = "Total_Assets"
//! label = "Total Assets"
//!
//! [output]
//! dir = "output"
//! format = "rounded"
//! frequency = "monthly"
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use treasurylab_core::align::ConflictPolicy;
use treasurylab_core::derive::MetricCatalog;
use treasurylab_core::format::OutputFormat;
use treasurylab_core::resample::Frequency;
use treasurylab_core::schema::{self, FieldSchema};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub market: MarketConfig,
    pub sources: SourcesConfig,
    pub schema: FieldSchema,
    pub derive: DeriveConfig,
    pub output: OutputConfig,
}

/// Provider-side inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    /// Equity ticker (`MSTR`).
    pub ticker: String,
    /// Priced reserve asset pair (`BTC-USD`).
    pub reserve: String,
    pub start: NaiveDate,
    /// Defaults to today.
    pub end: Option<NaiveDate>,
    /// Overrides the provider's figure when set.
    pub shares_outstanding: Option<f64>,
    pub cache_dir: PathBuf,
    /// Read only from the Parquet cache.
    pub offline: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            ticker: "MSTR".into(),
            reserve: "BTC-USD".into(),
            start: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default(),
            end: None,
            shares_outstanding: None,
            cache_dir: PathBuf::from("data"),
            offline: false,
        }
    }
}

/// Hand-maintained CSV records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    /// `Date, Total_{asset}`; required.
    pub holdings: PathBuf,
    /// Extra filings (`Date, Total_Liabilities, Gross_Profit`, ...).
    pub supplementary: Option<PathBuf>,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            holdings: PathBuf::from("data/btc_holdings.csv"),
            supplementary: Some(PathBuf::from("data/supplementary_financials.csv")),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeriveConfig {
    /// Custom metric catalog. The treasury catalog for the configured
    /// ticker and reserve is used when absent.
    pub metrics: Option<MetricCatalog>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub format: OutputFormat,
    pub frequency: Frequency,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            format: OutputFormat::default(),
            frequency: Frequency::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.ticker.trim().is_empty() || self.market.reserve.trim().is_empty() {
            return Err(ConfigError::Invalid("ticker and reserve must be non-empty".into()));
        }
        if let Some(end) = self.market.end {
            if end < self.market.start {
                return Err(ConfigError::Invalid(format!(
                    "end {end} is before start {}",
                    self.market.start
                )));
            }
        }
        if let Some(shares) = self.market.shares_outstanding {
            if !shares.is_finite() || shares <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "shares_outstanding must be positive, got {shares}"
                )));
            }
        }
        self.schema
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Effective end date.
    pub fn end_date(&self) -> NaiveDate {
        self.market
            .end
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// The configured catalog, or the treasury catalog for this ticker/reserve.
    pub fn catalog(&self) -> MetricCatalog {
        self.derive
            .metrics
            .clone()
            .unwrap_or_else(|| MetricCatalog::treasury(&self.market.ticker, &self.market.reserve))
    }

    /// Holdings column expected in the holdings record (`Total_BTC`).
    pub fn holdings_column(&self) -> String {
        schema::holdings_column(schema::reserve_asset(&self.market.reserve))
    }

    /// Deterministic content hash of this configuration.
    pub fn config_hash(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self)
            .map_err(|e| ConfigError::Invalid(format!("config serialization failed: {e}")))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}
