//! Metric derivation: row-wise formulas over the aligned table.
//!
//! Formulas are data, not code paths: a [`MetricCatalog`] lists named
//! [`MetricFormula`]s that reference input columns (or earlier metrics) by
//! name. Every reference is checked before any row is computed.
//!
//! A null operand, a zero denominator, or a non-finite result gives a null
//! cell. Those rows are undefined and never abort the run.

use crate::schema;
use crate::table::{Table, TableColumn, TableError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DeriveError {
    #[error("metric '{metric}' references unknown column '{column}'")]
    UnknownColumn { metric: String, column: String },

    #[error("metric '{0}' collides with an existing column")]
    DuplicateColumn(String),

    #[error("table error: {0}")]
    Table(#[from] TableError),
}

/// The scalar a [`MetricFormula::Scaled`] multiplies by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleFactor {
    /// The run's shares-outstanding figure.
    SharesOutstanding,
    Constant { value: f64 },
}

/// How a metric is computed from other columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetricFormula {
    /// `left × right`
    Product { left: String, right: String },
    /// `numerator / denominator`
    Ratio {
        numerator: String,
        denominator: String,
    },
    /// `left − right`
    Difference { left: String, right: String },
    /// `column × scalar`
    Scaled { column: String, by: ScaleFactor },
}

impl MetricFormula {
    /// Column names this formula reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Product { left, right } | Self::Difference { left, right } => {
                vec![left.as_str(), right.as_str()]
            }
            Self::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
            Self::Scaled { column, .. } => vec![column.as_str()],
        }
    }
}

/// Absolute amounts and ratios are formatted differently on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Absolute,
    Ratio,
}

/// A named derived column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
    pub formula: MetricFormula,
}

/// Ordered list of metrics. Later metrics may reference earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCatalog {
    pub metrics: Vec<MetricSpec>,
}

impl MetricCatalog {
    /// The seven treasury metrics for a company holding a reserve asset.
    ///
    /// `company` is the equity ticker (`MSTR`), `reserve` the priced pair
    /// (`BTC-USD`). Holdings are read from `Total_{asset}`.
    pub fn treasury(company: &str, reserve: &str) -> Self {
        let asset = schema::reserve_asset(reserve);
        let market_cap = schema::market_cap_column(company);
        let holdings_value = schema::holdings_value_column(asset);

        let metrics = vec![
            MetricSpec {
                name: market_cap.clone(),
                kind: MetricKind::Absolute,
                formula: MetricFormula::Scaled {
                    column: schema::close_column(company),
                    by: ScaleFactor::SharesOutstanding,
                },
            },
            MetricSpec {
                name: holdings_value.clone(),
                kind: MetricKind::Absolute,
                formula: MetricFormula::Product {
                    left: schema::holdings_column(asset),
                    right: schema::close_column(reserve),
                },
            },
            MetricSpec {
                name: schema::holdings_to_market_cap_column(asset),
                kind: MetricKind::Ratio,
                formula: MetricFormula::Ratio {
                    numerator: holdings_value.clone(),
                    denominator: market_cap.clone(),
                },
            },
            MetricSpec {
                name: schema::NET_ASSETS.into(),
                kind: MetricKind::Absolute,
                formula: MetricFormula::Difference {
                    left: schema::TOTAL_ASSETS.into(),
                    right: schema::TOTAL_LIABILITIES.into(),
                },
            },
            MetricSpec {
                name: schema::FINANCIAL_LEVERAGE.into(),
                kind: MetricKind::Ratio,
                formula: MetricFormula::Ratio {
                    numerator: schema::TOTAL_LIABILITIES.into(),
                    denominator: schema::TOTAL_ASSETS.into(),
                },
            },
            MetricSpec {
                name: schema::holdings_to_net_assets_column(asset),
                kind: MetricKind::Ratio,
                formula: MetricFormula::Ratio {
                    numerator: holdings_value,
                    denominator: schema::NET_ASSETS.into(),
                },
            },
            MetricSpec {
                name: schema::GROSS_PROFIT_MARGIN.into(),
                kind: MetricKind::Ratio,
                formula: MetricFormula::Ratio {
                    numerator: schema::GROSS_PROFIT.into(),
                    denominator: market_cap,
                },
            },
        ];

        Self { metrics }
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.kind)
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }

    /// Check every reference against `available` input columns.
    pub fn validate(&self, available: &[&str]) -> Result<(), DeriveError> {
        let mut known: HashSet<&str> = available.iter().copied().collect();
        for metric in &self.metrics {
            for input in metric.formula.inputs() {
                if !known.contains(input) {
                    return Err(DeriveError::UnknownColumn {
                        metric: metric.name.clone(),
                        column: input.to_string(),
                    });
                }
            }
            if !known.insert(metric.name.as_str()) {
                return Err(DeriveError::DuplicateColumn(metric.name.clone()));
            }
        }
        Ok(())
    }
}

/// Append every metric in `catalog` to a copy of `aligned`.
///
/// Output columns are the aligned inputs followed by the metrics in catalog order.
pub fn derive_metrics(
    aligned: &Table,
    catalog: &MetricCatalog,
    shares_outstanding: f64,
) -> Result<Table, DeriveError> {
    catalog.validate(&aligned.column_names())?;

    let mut out = aligned.clone();
    for metric in &catalog.metrics {
        let values = evaluate(&out, &metric.formula, shares_outstanding)?;
        out.push_column(TableColumn::new(metric.name.clone(), values))?;
    }

    tracing::debug!(metrics = catalog.metrics.len(), rows = out.height(), "derived metrics");
    Ok(out)
}

fn evaluate(
    table: &Table,
    formula: &MetricFormula,
    shares_outstanding: f64,
) -> Result<Vec<Option<f64>>, TableError> {
    let values = match formula {
        MetricFormula::Product { left, right } => zip_with(
            &table.require(left)?.values,
            &table.require(right)?.values,
            |a, b| Some(a * b),
        ),
        MetricFormula::Ratio {
            numerator,
            denominator,
        } => zip_with(
            &table.require(numerator)?.values,
            &table.require(denominator)?.values,
            |a, b| if b == 0.0 { None } else { Some(a / b) },
        ),
        MetricFormula::Difference { left, right } => zip_with(
            &table.require(left)?.values,
            &table.require(right)?.values,
            |a, b| Some(a - b),
        ),
        MetricFormula::Scaled { column, by } => {
            let scalar = match by {
                ScaleFactor::SharesOutstanding => shares_outstanding,
                ScaleFactor::Constant { value } => *value,
            };
            table
                .require(column)?
                .values
                .iter()
                .map(|v| v.map(|a| a * scalar).filter(|r| r.is_finite()))
                .collect()
        }
    };
    Ok(values)
}

fn zip_with(
    left: &[Option<f64>],
    right: &[Option<f64>],
    op: impl Fn(f64, f64) -> Option<f64>,
) -> Vec<Option<f64>> {
    left.iter()
        .zip(right)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => op(*a, *b).filter(|r| r.is_finite()),
            _ => None,
        })
        .collect()
}
