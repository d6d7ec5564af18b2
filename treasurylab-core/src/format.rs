//! Output formatting for persisted tables.
//!
//! Formatting is applied only when a table is written; computation always
//! uses full precision. `Rounded` truncates absolute amounts to integers and
//! rounds ratios to four significant digits. Input columns (prices, holdings,
//! filings) are always written as-is.

use crate::derive::MetricKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Shortest representation that round-trips.
    #[default]
    Raw,
    Rounded,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "rounded" => Ok(Self::Rounded),
            other => Err(format!("unknown format '{other}'. Valid: raw, rounded")),
        }
    }
}

/// Render one cell. Null is the empty string.
pub fn format_cell(value: Option<f64>, kind: Option<MetricKind>, format: OutputFormat) -> String {
    let Some(v) = value else {
        return String::new();
    };
    match (format, kind) {
        (OutputFormat::Raw, _) | (OutputFormat::Rounded, None) => v.to_string(),
        (OutputFormat::Rounded, Some(MetricKind::Absolute)) => {
            let t = v.trunc();
            if t == 0.0 {
                "0".to_string()
            } else {
                format!("{t:.0}")
            }
        }
        (OutputFormat::Rounded, Some(MetricKind::Ratio)) => round_significant(v, 4).to_string(),
    }
}

/// Round to `digits` significant digits.
pub fn round_significant(v: f64, digits: i32) -> f64 {
    if v == 0.0 || !v.is_finite() {
        return v;
    }
    let magnitude = v.abs().log10().floor() as i32;
    let shift = digits - 1 - magnitude;
    // Scale by an exact power of ten in whichever direction keeps it integral.
    if shift >= 0 {
        let factor = 10f64.powi(shift);
        (v * factor).round() / factor
    } else {
        let factor = 10f64.powi(-shift);
        (v / factor).round() * factor
    }
}
