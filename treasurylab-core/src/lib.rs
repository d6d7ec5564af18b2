//! TreasuryLab Core: series alignment, metric derivation, and market-data sources.
//!
//! This crate holds the pipeline that turns irregular inputs into one daily table:
//! - Date-keyed series from providers and hand-maintained CSV records
//! - Outer-join alignment with per-column forward fill (no look-ahead)
//! - Formula-driven derivation of treasury ratios
//! - Calendar resampling (period mean, keyed by period end)
//! - Output formatting rules for persisted tables
//!
//! Every stage takes an immutable [`table::Table`] snapshot and returns a new one.

pub mod align;
pub mod data;
pub mod derive;
pub mod format;
pub mod resample;
pub mod schema;
pub mod series;
pub mod table;
