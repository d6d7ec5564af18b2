//! Column naming and the balance-sheet field mapping.
//!
//! Logical field names (`Total_Assets`) are what the pipeline and the output
//! files use. Provider labels ("Total Assets") are what the data source calls
//! the same line item. [`FieldSchema`] maps one to the other and fails with a
//! named error when the provider does not carry a label.

use crate::data::provider::BalanceSheet;
use crate::series::{SourceSeries, TimeSeries};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header of the date column in every CSV this crate reads or writes.
pub const DATE_COLUMN: &str = "Date";

pub const TOTAL_ASSETS: &str = "Total_Assets";
pub const TOTAL_LIABILITIES: &str = "Total_Liabilities";
pub const GROSS_PROFIT: &str = "Gross_Profit";
pub const NET_ASSETS: &str = "Net_Assets_USD";
pub const FINANCIAL_LEVERAGE: &str = "Financial_Leverage_Ratio";
pub const GROSS_PROFIT_MARGIN: &str = "Gross_Profit_Margin";

/// `MSTR` -> `MSTR_Close`
pub fn close_column(symbol: &str) -> String {
    format!("{symbol}_Close")
}

/// The asset part of a pair symbol: `BTC-USD` -> `BTC`.
pub fn reserve_asset(symbol: &str) -> &str {
    symbol.split('-').next().unwrap_or(symbol)
}

/// `BTC` -> `Total_BTC`
pub fn holdings_column(asset: &str) -> String {
    format!("Total_{asset}")
}

/// `MSTR` -> `MSTR_Market_Cap_USD`
pub fn market_cap_column(company: &str) -> String {
    format!("{company}_Market_Cap_USD")
}

/// `BTC` -> `BTC_Holdings_Value_USD`
pub fn holdings_value_column(asset: &str) -> String {
    format!("{asset}_Holdings_Value_USD")
}

/// `BTC` -> `BTC_to_Market_Cap_Ratio`
pub fn holdings_to_market_cap_column(asset: &str) -> String {
    format!("{asset}_to_Market_Cap_Ratio")
}

/// `BTC` -> `BTC_to_Net_Assets_Ratio`
pub fn holdings_to_net_assets_column(asset: &str) -> String {
    format!("{asset}_to_Net_Assets_Ratio")
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("balance sheet for {symbol} has no line item '{label}' (needed for {field}); available: {available:?}")]
    LabelNotFound {
        symbol: String,
        field: String,
        label: String,
        available: Vec<String>,
    },

    #[error("field '{0}' is mapped more than once")]
    DuplicateField(String),
}

/// One logical field and the provider label it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    pub label: String,
}

impl FieldMapping {
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
        }
    }
}

/// Which balance-sheet line items to pull and what to call them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub balance_sheet: Vec<FieldMapping>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            balance_sheet: vec![
                FieldMapping::new(TOTAL_ASSETS, "Total Assets"),
                FieldMapping::new(
                    TOTAL_LIABILITIES,
                    "Total Liabilities Net Minority Interest",
                ),
            ],
        }
    }
}

impl FieldSchema {
    /// Provider labels to request, in mapping order.
    pub fn labels(&self) -> Vec<&str> {
        self.balance_sheet.iter().map(|m| m.label.as_str()).collect()
    }

    /// Reject a schema that maps the same field twice.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for m in &self.balance_sheet {
            if !seen.insert(m.field.as_str()) {
                return Err(SchemaError::DuplicateField(m.field.clone()));
            }
        }
        Ok(())
    }

    /// Pull each mapped line item out of `sheet` as a series named by its field.
    pub fn resolve(&self, sheet: &BalanceSheet) -> Result<SourceSeries, SchemaError> {
        self.validate()?;
        let mut series = Vec::with_capacity(self.balance_sheet.len());
        for mapping in &self.balance_sheet {
            let item = sheet
                .line_item(&mapping.label)
                .ok_or_else(|| SchemaError::LabelNotFound {
                    symbol: sheet.symbol.clone(),
                    field: mapping.field.clone(),
                    label: mapping.label.clone(),
                    available: sheet.labels().into_iter().map(String::from).collect(),
                })?;
            series.push(TimeSeries::from_points(
                mapping.field.clone(),
                item.iter().map(|(d, v)| (*d, *v)),
            ));
        }
        Ok(SourceSeries::new(
            format!("{}:balance_sheet", sheet.symbol),
            series,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sheet() -> BalanceSheet {
        let mut sheet = BalanceSheet::new("MSTR");
        let q = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        sheet.insert("Total Assets", q, 7_000.0);
        sheet.insert("Total Liabilities Net Minority Interest", q, 4_000.0);
        sheet
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(close_column("BTC-USD"), "BTC-USD_Close");
        assert_eq!(reserve_asset("BTC-USD"), "BTC");
        assert_eq!(reserve_asset("ETH"), "ETH");
        assert_eq!(holdings_column("BTC"), "Total_BTC");
        assert_eq!(market_cap_column("MSTR"), "MSTR_Market_Cap_USD");
    }

    #[test]
    fn default_schema_resolves() {
        let resolved = FieldSchema::default().resolve(&sheet()).unwrap();
        assert_eq!(
            resolved.field_names(),
            vec![TOTAL_ASSETS, TOTAL_LIABILITIES]
        );
        assert_eq!(resolved.source, "MSTR:balance_sheet");
    }

    #[test]
    fn missing_label_is_named_error() {
        let schema = FieldSchema {
            balance_sheet: vec![FieldMapping::new(GROSS_PROFIT, "Gross Profit")],
        };
        match schema.resolve(&sheet()).unwrap_err() {
            SchemaError::LabelNotFound { field, label, available, .. } => {
                assert_eq!(field, GROSS_PROFIT);
                assert_eq!(label, "Gross Profit");
                assert_eq!(available.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_field_rejected() {
        let schema = FieldSchema {
            balance_sheet: vec![
                FieldMapping::new(TOTAL_ASSETS, "Total Assets"),
                FieldMapping::new(TOTAL_ASSETS, "Assets"),
            ],
        };
        assert_eq!(
            schema.validate().unwrap_err(),
            SchemaError::DuplicateField(TOTAL_ASSETS.into())
        );
    }
}
