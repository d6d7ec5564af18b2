//! Yahoo Finance data provider.
//!
//! Daily closes come from the v8 chart API. Balance-sheet line items and the
//! shares-outstanding figure come from the fundamentals-timeseries API, which
//! keys series by labels like `quarterlyTotalAssets`.
//!
//! Yahoo has no official API and is subject to unannounced format changes.
//! Every request is made once; a failure surfaces as a `DataError` and the
//! Parquet cache (`--offline`) is the fallback.

use super::provider::{BalanceSheet, DataError, MarketDataProvider};
use crate::series::TimeSeries;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

const CHART_BASE: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const TIMESERIES_BASE: &str =
    "https://query2.finance.yahoo.com/ws/fundamentals-timeseries/v1/finance/timeseries";

/// Earliest filing date requested from the fundamentals API.
const FUNDAMENTALS_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2010, 1, 1) {
    Some(d) => d,
    None => panic!("invalid fundamentals epoch"),
};

// ── Chart API ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

// ── Fundamentals timeseries API ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TimeseriesResponse {
    timeseries: TimeseriesResult,
}

#[derive(Debug, Deserialize)]
struct TimeseriesResult {
    result: Option<Vec<serde_json::Value>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundamentalPoint {
    as_of_date: String,
    reported_value: Option<ReportedValue>,
}

#[derive(Debug, Deserialize)]
struct ReportedValue {
    raw: f64,
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
}

impl YahooProvider {
    pub fn new() -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Build the chart API URL for a symbol and date range.
    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(start_ts);
        format!(
            "{CHART_BASE}/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d&events=history"
        )
    }

    /// Build the fundamentals-timeseries URL for a set of series keys.
    fn timeseries_url(symbol: &str, keys: &[String]) -> String {
        let start_ts = FUNDAMENTALS_EPOCH
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp();
        let end_ts = chrono::Utc::now().timestamp();
        format!(
            "{TIMESERIES_BASE}/{symbol}?symbol={symbol}&type={}&period1={start_ts}&period2={end_ts}",
            keys.join(",")
        )
    }

    /// "Total Liabilities Net Minority Interest" -> "quarterlyTotalLiabilitiesNetMinorityInterest"
    fn quarterly_key(label: &str) -> String {
        let compact: String = label.split_whitespace().collect();
        format!("quarterly{compact}")
    }

    /// Parse the chart API response into a close series.
    fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<TimeSeries, DataError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => DataError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let timestamps = data
            .timestamp
            .ok_or_else(|| DataError::ResponseFormatChanged("no timestamps".into()))?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let mut closes = TimeSeries::new(symbol);
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            // Holidays and halted sessions come back as null closes.
            if let Some(close) = quote.close.get(i).copied().flatten() {
                closes.insert(date, close);
            }
        }

        if closes.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(closes)
    }

    /// Parse a fundamentals response into `key -> (date -> value)`.
    fn parse_timeseries(
        symbol: &str,
        resp: TimeseriesResponse,
    ) -> Result<Vec<(String, Vec<(NaiveDate, f64)>)>, DataError> {
        if let Some(err) = resp.timeseries.error {
            return Err(DataError::ResponseFormatChanged(format!(
                "{}: {}",
                err.code, err.description
            )));
        }
        let entries = resp.timeseries.result.ok_or_else(|| DataError::NoData {
            symbol: symbol.to_string(),
            what: "fundamentals".into(),
        })?;

        let mut out = Vec::new();
        for entry in entries {
            let key = entry
                .pointer("/meta/type/0")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DataError::ResponseFormatChanged("series without meta.type".into()))?
                .to_string();

            // A requested series with no filings has no data array at all.
            let Some(raw) = entry.get(&key) else {
                out.push((key, Vec::new()));
                continue;
            };
            let points: Vec<Option<FundamentalPoint>> = serde_json::from_value(raw.clone())
                .map_err(|e| DataError::ResponseFormatChanged(format!("{key}: {e}")))?;

            let mut observations = Vec::with_capacity(points.len());
            for p in points.into_iter().flatten() {
                let date = NaiveDate::parse_from_str(&p.as_of_date, "%Y-%m-%d").map_err(|e| {
                    DataError::ResponseFormatChanged(format!(
                        "{key}: bad asOfDate '{}': {e}",
                        p.as_of_date
                    ))
                })?;
                if let Some(v) = p.reported_value {
                    observations.push((date, v.raw));
                }
            }
            out.push((key, observations));
        }
        Ok(out)
    }

    /// Execute one GET and deserialize the JSON body.
    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        symbol: &str,
    ) -> Result<T, DataError> {
        tracing::debug!(%url, "GET");
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DataError::NetworkUnreachable(e.to_string())
            } else {
                DataError::Other(format!("request for {symbol} failed: {e}"))
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(DataError::Blocked);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DataError::Other(format!("HTTP {status} for {symbol}")));
        }

        resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, DataError> {
        let chart: ChartResponse = self.get_json(&Self::chart_url(symbol, start, end), symbol)?;
        let closes = Self::parse_chart(symbol, chart)?;
        tracing::info!(symbol, rows = closes.len(), "fetched daily closes");
        Ok(closes.between(start, end))
    }

    fn shares_outstanding(&self, symbol: &str) -> Result<f64, DataError> {
        let keys = vec![
            "quarterlyOrdinarySharesNumber".to_string(),
            "annualOrdinarySharesNumber".to_string(),
        ];
        let resp: TimeseriesResponse =
            self.get_json(&Self::timeseries_url(symbol, &keys), symbol)?;
        let series = Self::parse_timeseries(symbol, resp)?;

        // Most recent filing wins, whichever period it was reported for.
        let latest = series
            .iter()
            .flat_map(|(_, obs)| obs.iter().copied())
            .max_by_key(|(date, _)| *date)
            .map(|(_, v)| v)
            .ok_or_else(|| DataError::NoData {
                symbol: symbol.to_string(),
                what: "shares outstanding".into(),
            })?;
        tracing::info!(symbol, shares = latest, "fetched shares outstanding");
        Ok(latest)
    }

    fn balance_sheet(&self, symbol: &str, labels: &[&str]) -> Result<BalanceSheet, DataError> {
        let keys: Vec<String> = labels.iter().map(|l| Self::quarterly_key(l)).collect();
        let resp: TimeseriesResponse =
            self.get_json(&Self::timeseries_url(symbol, &keys), symbol)?;
        let series = Self::parse_timeseries(symbol, resp)?;

        let mut sheet = BalanceSheet::new(symbol);
        for (label, key) in labels.iter().zip(&keys) {
            let Some((_, obs)) = series.iter().find(|(k, _)| k == key) else {
                continue;
            };
            if obs.is_empty() {
                continue;
            }
            for (date, value) in obs {
                sheet.insert(label, *date, *value);
            }
        }
        tracing::info!(symbol, items = sheet.labels().len(), "fetched balance sheet");
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarterly_key_compacts_label() {
        assert_eq!(
            YahooProvider::quarterly_key("Total Liabilities Net Minority Interest"),
            "quarterlyTotalLiabilitiesNetMinorityInterest"
        );
        assert_eq!(YahooProvider::quarterly_key("Total Assets"), "quarterlyTotalAssets");
    }

    #[test]
    fn chart_url_covers_whole_end_day() {
        let url = YahooProvider::chart_url(
            "MSTR",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        assert!(url.contains("/MSTR?"));
        assert!(url.contains("period1=1704067200"));
        assert!(url.contains("period2=1704153599"));
    }

    #[test]
    fn parse_chart_skips_null_closes() {
        let json = r#"{"chart":{"result":[{"timestamp":[1704205800,1704292200,1704378600],
            "indicators":{"quote":[{"close":[10.0,null,12.5]}]}}],"error":null}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let closes = YahooProvider::parse_chart("MSTR", resp).unwrap();
        assert_eq!(closes.len(), 2);
        assert_eq!(
            closes.get(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()),
            Some(12.5)
        );
    }

    #[test]
    fn parse_chart_not_found() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            YahooProvider::parse_chart("NOPE", resp),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn parse_timeseries_reads_reported_values() {
        let json = r#"{"timeseries":{"result":[
            {"meta":{"symbol":["MSTR"],"type":["quarterlyTotalAssets"]},
             "timestamp":[1711843200],
             "quarterlyTotalAssets":[
                {"asOfDate":"2023-12-31","periodType":"3M","reportedValue":{"raw":4762.0,"fmt":"4.76k"}},
                null,
                {"asOfDate":"2024-03-31","periodType":"3M","reportedValue":{"raw":7000.0,"fmt":"7k"}}]},
            {"meta":{"symbol":["MSTR"],"type":["quarterlyGrossProfit"]}}
        ],"error":null}}"#;
        let resp: TimeseriesResponse = serde_json::from_str(json).unwrap();
        let series = YahooProvider::parse_timeseries("MSTR", resp).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, "quarterlyTotalAssets");
        assert_eq!(series[0].1.len(), 2);
        assert_eq!(series[0].1[1].1, 7000.0);
        assert!(series[1].1.is_empty());
    }
}
