//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. No back-fill: a column is null strictly before its first observation
//! 2. Date union: the aligned calendar is exactly the union of input dates
//! 3. Exact arithmetic: product and difference metrics match row by row
//! 4. Resampling a constant month yields that constant

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use treasurylab_core::align::{align_sources, AlignOptions};
use treasurylab_core::derive::{derive_metrics, MetricCatalog};
use treasurylab_core::resample::{resample_mean, Frequency};
use treasurylab_core::series::{SourceSeries, TimeSeries};
use treasurylab_core::table::{Table, TableColumn};

// ── Strategies (proptest) ────────────────────────────────────────────

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn day(offset: u32) -> NaiveDate {
    base().checked_add_days(Days::new(u64::from(offset))).unwrap()
}

/// A sparse series over roughly two years.
fn arb_series(name: &'static str) -> impl Strategy<Value = TimeSeries> {
    prop::collection::btree_map(0u32..730, 1.0..1.0e6_f64, 1..40).prop_map(move |m| {
        TimeSeries::from_points(name, m.into_iter().map(|(off, v)| (day(off), v)))
    })
}

fn arb_values(n: usize) -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(prop::option::weighted(0.8, -1.0e9..1.0e9_f64), n)
}

fn source(name: &str, series: Vec<TimeSeries>) -> SourceSeries {
    SourceSeries::new(name, series)
}

// ── 1 & 2. Alignment ─────────────────────────────────────────────────

proptest! {
    /// Forward fill never invents a value before the first observation.
    #[test]
    fn no_value_before_first_observation(
        daily in arb_series("Close"),
        sparse in arb_series("Total_BTC"),
    ) {
        let first_holding = sparse.first_date().unwrap();
        let aligned = align_sources(
            &[source("market", vec![daily]), source("holdings", vec![sparse])],
            &AlignOptions::default(),
        );
        let table = aligned.table;
        let column = table.column("Total_BTC").unwrap();

        for (date, value) in table.dates().iter().zip(&column.values) {
            if *date < first_holding {
                prop_assert!(value.is_none(), "back-filled at {}", date);
            } else {
                prop_assert!(value.is_some(), "gap left at {}", date);
            }
        }
    }

    /// Filled values always equal the most recent observation at or before the row.
    #[test]
    fn fill_carries_latest_observation(
        daily in arb_series("Close"),
        sparse in arb_series("Total_BTC"),
    ) {
        let expected = sparse.points.clone();
        let aligned = align_sources(
            &[source("market", vec![daily]), source("holdings", vec![sparse])],
            &AlignOptions::default(),
        );
        let table = aligned.table;
        let column = table.column("Total_BTC").unwrap();

        for (date, value) in table.dates().iter().zip(&column.values) {
            let latest = expected.range(..=*date).next_back().map(|(_, v)| *v);
            prop_assert_eq!(*value, latest);
        }
    }

    /// The calendar is the union of every input date set. Nothing is dropped.
    #[test]
    fn calendar_is_union_of_inputs(
        a in arb_series("A"),
        b in arb_series("B"),
        c in arb_series("C"),
    ) {
        let mut expected: BTreeSet<NaiveDate> = BTreeSet::new();
        for s in [&a, &b, &c] {
            expected.extend(s.points.keys().copied());
        }
        let aligned = align_sources(
            &[source("x", vec![a, b]), source("y", vec![c])],
            &AlignOptions::default(),
        );
        let got: BTreeSet<NaiveDate> = aligned.table.dates().iter().copied().collect();
        prop_assert_eq!(got, expected);
        prop_assert!(aligned.table.dates().windows(2).all(|w| w[0] < w[1]));
    }
}

// ── 3. Exact arithmetic ──────────────────────────────────────────────

fn treasury_inputs(values: [Vec<Option<f64>>; 6]) -> Table {
    let n = values[0].len();
    let dates = (0..n as u32).map(day).collect();
    let names = [
        "MSTR_Close",
        "BTC-USD_Close",
        "Total_BTC",
        "Total_Assets",
        "Total_Liabilities",
        "Gross_Profit",
    ];
    names
        .iter()
        .zip(values)
        .try_fold(Table::new(dates).unwrap(), |t, (name, v)| {
            t.with_column(TableColumn::new(*name, v))
        })
        .unwrap()
}

proptest! {
    #[test]
    fn product_and_difference_are_exact(
        (close, btc_close, holdings, assets, liabilities, profit) in (1usize..60).prop_flat_map(|n| (
            arb_values(n), arb_values(n), arb_values(n),
            arb_values(n), arb_values(n), arb_values(n),
        )),
        shares in 1.0..1.0e9_f64,
    ) {
        let input = treasury_inputs([close, btc_close, holdings, assets, liabilities, profit]);
        let out = derive_metrics(&input, &MetricCatalog::treasury("MSTR", "BTC-USD"), shares).unwrap();

        let col = |name: &str| out.column(name).unwrap().values.clone();
        let (total_btc, btc_price) = (col("Total_BTC"), col("BTC-USD_Close"));
        let (assets, liabilities) = (col("Total_Assets"), col("Total_Liabilities"));
        let holdings_value = col("BTC_Holdings_Value_USD");
        let net_assets = col("Net_Assets_USD");

        for row in 0..out.height() {
            match (total_btc[row], btc_price[row]) {
                (Some(a), Some(b)) => prop_assert_eq!(holdings_value[row], Some(a * b)),
                _ => prop_assert_eq!(holdings_value[row], None),
            }
            match (assets[row], liabilities[row]) {
                (Some(a), Some(l)) => prop_assert_eq!(net_assets[row], Some(a - l)),
                _ => prop_assert_eq!(net_assets[row], None),
            }
        }
    }

    /// Ratios are null exactly when an operand is null or the denominator is zero.
    #[test]
    fn leverage_null_iff_undefined(
        assets in arb_values(30),
        liabilities in arb_values(30),
    ) {
        let n = assets.len();
        let filler = vec![Some(1.0); n];
        let input = treasury_inputs([
            filler.clone(), filler.clone(), filler.clone(),
            assets.clone(), liabilities.clone(), filler,
        ]);
        let out = derive_metrics(&input, &MetricCatalog::treasury("MSTR", "BTC-USD"), 1.0).unwrap();
        let leverage = &out.column("Financial_Leverage_Ratio").unwrap().values;

        for row in 0..n {
            let defined = matches!((assets[row], liabilities[row]), (Some(a), Some(_)) if a != 0.0);
            prop_assert_eq!(leverage[row].is_some(), defined);
        }
    }
}

// ── 4. Resampling ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn constant_month_resamples_to_constant(
        value in -1.0e12..1.0e12_f64,
        days in prop::collection::btree_set(1u32..=31, 1..31),
    ) {
        let dates: Vec<NaiveDate> = days
            .iter()
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, *d).unwrap())
            .collect();
        let n = dates.len();
        let table = Table::new(dates)
            .unwrap()
            .with_column(TableColumn::new("x", vec![Some(value); n]))
            .unwrap();

        let monthly = resample_mean(&table, Frequency::Monthly);
        prop_assert_eq!(monthly.dates(), &[NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()]);
        prop_assert_eq!(&monthly.column("x").unwrap().values, &vec![Some(value)]);
    }

    /// Every frequency keys a row by a period end on or after each member date.
    #[test]
    fn period_end_bounds_members(offset in 0u32..3000) {
        let date = day(offset);
        for freq in [Frequency::Weekly, Frequency::Monthly, Frequency::Quarterly, Frequency::Yearly] {
            let end = freq.period_end(date);
            prop_assert!(end >= date);
            prop_assert_eq!(freq.period_end(end), end);
        }
    }
}

#[test]
fn worked_example_end_to_end() {
    let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
    let flat = |name: &str, v: f64| {
        TimeSeries::from_points(name, [d("2021-01-01"), d("2021-02-01")].map(|x| (x, v)))
    };
    let holdings = TimeSeries::from_points(
        "Total_BTC",
        vec![(d("2021-01-01"), 100.0), (d("2021-02-01"), 150.0)],
    );
    let mut sheet_fields = BTreeMap::new();
    sheet_fields.insert("Total_Assets", 10.0);
    sheet_fields.insert("Total_Liabilities", 4.0);
    sheet_fields.insert("Gross_Profit", 1.0);
    let filings: Vec<TimeSeries> = sheet_fields
        .into_iter()
        .map(|(name, v)| flat(name, v))
        .collect();

    let aligned = align_sources(
        &[
            source("market", vec![flat("MSTR_Close", 10.0), flat("BTC-USD_Close", 50_000.0)]),
            source("holdings", vec![holdings]),
            source("filings", filings),
        ],
        &AlignOptions::default(),
    );
    let out = derive_metrics(&aligned.table, &MetricCatalog::treasury("MSTR", "BTC-USD"), 2.0)
        .unwrap();

    let jan = d("2021-01-01");
    assert_eq!(out.value_at("BTC_Holdings_Value_USD", jan), Some(5_000_000.0));
    assert_eq!(out.value_at("MSTR_Market_Cap_USD", jan), Some(20.0));
    assert_eq!(out.value_at("BTC_to_Market_Cap_Ratio", jan), Some(250_000.0));
    assert_eq!(
        out.value_at("BTC_Holdings_Value_USD", d("2021-02-01")),
        Some(7_500_000.0)
    );
}
