//! Date-keyed series as produced by a single source.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One field from one source, keyed by calendar date.
///
/// Dates are unique by construction; inserting a date twice keeps the later value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub points: BTreeMap<NaiveDate, f64>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: BTreeMap::new(),
        }
    }

    /// Build a series from (date, value) pairs. Later duplicates overwrite earlier ones.
    pub fn from_points(
        name: impl Into<String>,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Self {
        Self {
            name: name.into(),
            points: points.into_iter().collect(),
        }
    }

    /// Insert an observation, returning the value it replaced.
    pub fn insert(&mut self, date: NaiveDate, value: f64) -> Option<f64> {
        self.points.insert(date, value)
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.keys().next_back().copied()
    }

    /// Most recent observation.
    pub fn latest(&self) -> Option<(NaiveDate, f64)> {
        self.points.iter().next_back().map(|(d, v)| (*d, *v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points.iter().map(|(d, v)| (*d, *v))
    }

    /// Same observations under a different column name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Observations with `start <= date <= end`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: self.name.clone(),
            points: self
                .points
                .range(start..=end)
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }
}

/// Every series read from one source (a provider call or a local record).
///
/// The source label shows up in conflict reports.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSeries {
    pub source: String,
    pub series: Vec<TimeSeries>,
}

impl SourceSeries {
    pub fn new(source: impl Into<String>, series: Vec<TimeSeries>) -> Self {
        Self {
            source: source.into(),
            series,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TimeSeries> {
        self.series.iter().find(|s| s.name == name)
    }
}
