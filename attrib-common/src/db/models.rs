//! Typed records for the attribution store
//!
//! Rows are parsed and validated at the adapter boundary so downstream
//! stages never handle loosely-typed data.

use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format used in the store and on the scoring wire
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a stored `YYYY-MM-DD HH:MM:SS` timestamp
pub fn parse_event_time(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, EVENT_TIME_FORMAT)
        .map_err(|e| Error::InvalidRecord(format!("Bad timestamp {:?}: {}", raw, e)))
}

/// Format a timestamp for storage or the scoring wire
pub fn format_event_time(ts: &NaiveDateTime) -> String {
    ts.format(EVENT_TIME_FORMAT).to_string()
}

/// A single marketing touchpoint read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub channel_name: String,
    pub event_time: NaiveDateTime,
    /// Media cost of this session, >= 0
    pub cost: f64,
}

/// An outcome record read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub conversion_id: String,
    pub user_id: String,
    pub event_time: NaiveDateTime,
    /// Revenue of this conversion, >= 0
    pub revenue: f64,
}

/// A per-touchpoint credit weight returned by the scoring service
///
/// Persisted with a uniqueness constraint on `(session_id, conversion_id)`;
/// re-inserting the same pair is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub session_id: String,
    pub conversion_id: String,
    /// Fractional credit in [0, 1]
    pub ihc_weight: f64,
}

/// One row of the per-channel, per-date performance report
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReportRow {
    pub channel_name: String,
    pub date: NaiveDate,
    pub cost: f64,
    pub ihc: f64,
    pub ihc_revenue: f64,
    /// Cost per order, `cost / ihc`; None when ihc is zero
    pub cpo: Option<f64>,
    /// Return on ad spend, `ihc_revenue / cost`; None when cost is zero
    pub roas: Option<f64>,
}

impl ChannelReportRow {
    /// Build a report row from accumulated totals, deriving CPO and ROAS
    /// with the zero guards.
    pub fn from_totals(
        channel_name: String,
        date: NaiveDate,
        cost: f64,
        ihc: f64,
        ihc_revenue: f64,
    ) -> Self {
        let cpo = if ihc > 0.0 { Some(cost / ihc) } else { None };
        let roas = if cost > 0.0 {
            Some(ihc_revenue / cost)
        } else {
            None
        };
        Self {
            channel_name,
            date,
            cost,
            ihc,
            ihc_revenue,
            cpo,
            roas,
        }
    }
}

/// Aggregation input: one stored attribution weight joined with its session
/// (channel, date) and conversion revenue
#[derive(Debug, Clone)]
pub struct AttributedTouch {
    pub channel_name: String,
    pub date: NaiveDate,
    pub ihc_weight: f64,
    pub revenue: f64,
}

/// Aggregation input: one session's cost keyed by channel and date
#[derive(Debug, Clone)]
pub struct SessionCost {
    pub channel_name: String,
    pub date: NaiveDate,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_event_time() {
        let ts = parse_event_time("2023-09-01 13:45:07").unwrap();
        assert_eq!(format_event_time(&ts), "2023-09-01 13:45:07");
    }

    #[test]
    fn rejects_malformed_event_time() {
        assert!(parse_event_time("2023-09-01T13:45:07Z").is_err());
        assert!(parse_event_time("not a time").is_err());
    }

    #[test]
    fn report_row_zero_ihc_has_no_cpo() {
        let date = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
        let row = ChannelReportRow::from_totals("Search".into(), date, 15.0, 0.0, 0.0);
        assert_eq!(row.cpo, None);
        assert_eq!(row.roas, Some(0.0));
    }

    #[test]
    fn report_row_zero_cost_has_no_roas() {
        let date = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
        let row = ChannelReportRow::from_totals("Organic".into(), date, 0.0, 5.0, 120.0);
        assert_eq!(row.roas, None);
        assert_eq!(row.cpo, Some(0.0));
    }

    #[test]
    fn report_row_metric_derivation() {
        let date = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
        let row = ChannelReportRow::from_totals("Search".into(), date, 15.0, 3.0, 150.0);
        assert_eq!(row.cpo, Some(5.0));
        assert_eq!(row.roas, Some(10.0));
    }
}
