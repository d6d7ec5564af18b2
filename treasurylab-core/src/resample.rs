//! Calendar resampling: period means keyed by period end.
//!
//! Rows are grouped by the calendar period their date falls in. Each column's
//! non-null values are averaged per group, with no weighting by day count, so
//! a partial first or last period averages fewer days. A group with no values
//! for a column yields null.

use crate::table::{Table, TableColumn};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Target granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Weeks ending Sunday.
    Weekly,
    #[default]
    Monthly,
    /// Quarters ending Mar/Jun/Sep/Dec.
    Quarterly,
    Yearly,
}

impl Frequency {
    /// Last calendar day of the period containing `date`.
    pub fn period_end(&self, date: NaiveDate) -> NaiveDate {
        let end = match self {
            Self::Weekly => {
                let to_sunday = 6 - date.weekday().num_days_from_monday();
                date.checked_add_days(Days::new(u64::from(to_sunday)))
            }
            Self::Monthly => month_end(date.year(), date.month()),
            Self::Quarterly => {
                let quarter_last_month = ((date.month() - 1) / 3 + 1) * 3;
                month_end(date.year(), quarter_last_month)
            }
            Self::Yearly => NaiveDate::from_ymd_opt(date.year(), 12, 31),
        };
        end.unwrap_or(NaiveDate::MAX)
    }

    /// File-name suffix for tables at this frequency.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weekly" | "w" => Ok(Self::Weekly),
            "monthly" | "m" => Ok(Self::Monthly),
            "quarterly" | "q" => Ok(Self::Quarterly),
            "yearly" | "annual" | "y" => Ok(Self::Yearly),
            other => Err(format!(
                "unknown frequency '{other}'. Valid: weekly, monthly, quarterly, yearly"
            )),
        }
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Mean of every column per period, keyed by period end.
pub fn resample_mean(table: &Table, freq: Frequency) -> Table {
    // Dates are ascending, so each period is one contiguous run of rows.
    let mut groups: Vec<(NaiveDate, std::ops::Range<usize>)> = Vec::new();
    for (row, date) in table.dates().iter().enumerate() {
        let key = freq.period_end(*date);
        match groups.last_mut() {
            Some((last_key, range)) if *last_key == key => range.end = row + 1,
            _ => groups.push((key, row..row + 1)),
        }
    }

    let keys: Vec<NaiveDate> = groups.iter().map(|(k, _)| *k).collect();
    let mut out = Table::new(keys).unwrap_or_default();

    for column in table.columns() {
        let values = groups
            .iter()
            .map(|(_, rows)| mean_of(&column.values[rows.clone()]))
            .collect();
        if let Err(e) = out.push_column(TableColumn::new(column.name.clone(), values)) {
            tracing::error!(error = %e, "resampled column rejected");
        }
    }

    tracing::debug!(
        frequency = freq.label(),
        input_rows = table.height(),
        output_rows = out.height(),
        "resampled table"
    );
    out
}

/// Mean of the non-null values, shifted by the first one so a constant
/// group returns that constant exactly.
fn mean_of(values: &[Option<f64>]) -> Option<f64> {
    let mut present = values.iter().flatten();
    let base = *present.next()?;
    let (offset_sum, n) = present.fold((0.0, 1usize), |(s, n), v| (s + (v - base), n + 1));
    Some(base + offset_sum / n as f64)
}
