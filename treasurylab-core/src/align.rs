//! Multi-source time alignment.
//!
//! Given series from several sources at different native frequencies (daily
//! closes, quarterly filings, hand-recorded holdings), build one table over the
//! union of all observed dates. Each column is forward-filled on its own: the
//! last known value persists until superseded. Cells before a column's first
//! observation stay null; nothing is back-filled or interpolated.

use crate::series::SourceSeries;
use crate::table::{Table, TableColumn};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which source wins when two sources report the same field on the same date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The source merged later overrides earlier ones.
    #[default]
    LastSourceWins,
    /// The first source to report a value keeps it.
    FirstSourceWins,
}

/// Calendar bounds and conflict handling for an alignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignOptions {
    /// Lower bound (inclusive). Earlier observations only seed the fill state.
    pub start: Option<NaiveDate>,
    /// Upper bound (inclusive).
    pub end: Option<NaiveDate>,
    pub conflict_policy: ConflictPolicy,
}

/// Two sources disagreed on a field's value for one date.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    pub field: String,
    pub date: NaiveDate,
    pub kept_source: String,
    pub kept: f64,
    pub discarded_source: String,
    pub discarded: f64,
}

/// The aligned table plus any conflicts resolved while merging.
#[derive(Debug, Clone)]
pub struct AlignedData {
    pub table: Table,
    pub conflicts: Vec<FieldConflict>,
}

/// Outer-join every source on date, then forward-fill each column independently.
///
/// Column order is the order in which fields are first seen across `sources`.
/// Non-finite values count as missing observations: their dates join the
/// calendar, but they never enter the fill state.
pub fn align_sources(sources: &[SourceSeries], opts: &AlignOptions) -> AlignedData {
    // field -> date -> (value, source index)
    let mut order: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, BTreeMap<NaiveDate, (f64, usize)>> = BTreeMap::new();
    let mut all_dates = BTreeSet::new();
    let mut conflicts = Vec::new();

    for (src_idx, source) in sources.iter().enumerate() {
        for series in &source.series {
            if !merged.contains_key(&series.name) {
                order.push(series.name.clone());
            }
            let field = merged.entry(series.name.clone()).or_default();

            for (date, value) in series.iter() {
                all_dates.insert(date);
                if !value.is_finite() {
                    continue;
                }
                match field.get(&date).copied() {
                    None => {
                        field.insert(date, (value, src_idx));
                    }
                    Some((existing, existing_idx)) => {
                        if existing == value {
                            continue;
                        }
                        let conflict = match opts.conflict_policy {
                            ConflictPolicy::LastSourceWins => {
                                field.insert(date, (value, src_idx));
                                FieldConflict {
                                    field: series.name.clone(),
                                    date,
                                    kept_source: source.source.clone(),
                                    kept: value,
                                    discarded_source: sources[existing_idx].source.clone(),
                                    discarded: existing,
                                }
                            }
                            ConflictPolicy::FirstSourceWins => FieldConflict {
                                field: series.name.clone(),
                                date,
                                kept_source: sources[existing_idx].source.clone(),
                                kept: existing,
                                discarded_source: source.source.clone(),
                                discarded: value,
                            },
                        };
                        tracing::warn!(
                            field = %conflict.field,
                            date = %conflict.date,
                            kept_source = %conflict.kept_source,
                            kept = conflict.kept,
                            discarded_source = %conflict.discarded_source,
                            discarded = conflict.discarded,
                            "sources disagree on a field value"
                        );
                        conflicts.push(conflict);
                    }
                }
            }
        }
    }

    let in_bounds = |d: &NaiveDate| {
        opts.start.map_or(true, |s| *d >= s) && opts.end.map_or(true, |e| *d <= e)
    };
    let dates: Vec<NaiveDate> = all_dates.into_iter().filter(in_bounds).collect();

    let mut columns = Vec::with_capacity(order.len());
    for name in &order {
        let observations = &merged[name];

        // Seed from the latest observation before the window so a value
        // disclosed before `start` still counts on the first day.
        let mut last: Option<f64> = opts
            .start
            .and_then(|s| observations.range(..s).next_back())
            .map(|(_, (v, _))| *v);

        let values: Vec<Option<f64>> = dates
            .iter()
            .map(|date| {
                if let Some((v, _)) = observations.get(date) {
                    last = Some(*v);
                }
                last
            })
            .collect();

        columns.push(TableColumn::new(name.clone(), values));
    }

    let mut table = Table::new(dates).unwrap_or_default();
    for column in columns {
        // Names are unique keys of `merged` and lengths match `dates`.
        if let Err(e) = table.push_column(column) {
            tracing::error!(error = %e, "aligned column rejected");
        }
    }

    tracing::debug!(
        rows = table.height(),
        columns = table.width(),
        conflicts = conflicts.len(),
        "aligned sources"
    );

    AlignedData { table, conflicts }
}
