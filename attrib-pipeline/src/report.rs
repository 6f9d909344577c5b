//! Channel performance aggregation and CSV export
//!
//! Joins stored attribution weights with session cost and conversion revenue
//! to produce one row per `(channel_name, date)`. Cost covers every session
//! in the window whether or not it was attributed; CPO and ROAS are left
//! undefined rather than divided by zero.

use attrib_common::db::{AttributedTouch, ChannelReportRow, SessionCost};
use attrib_common::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    cost: f64,
    ihc: f64,
    ihc_revenue: f64,
}

/// Accumulate attribution weights and session costs into report rows,
/// sorted by `(date, channel_name)`.
pub fn build_channel_report(
    touches: &[AttributedTouch],
    costs: &[SessionCost],
) -> Vec<ChannelReportRow> {
    // BTreeMap keying gives the deterministic (date, channel) ordering
    let mut totals: BTreeMap<(NaiveDate, String), Totals> = BTreeMap::new();

    for cost in costs {
        let entry = totals
            .entry((cost.date, cost.channel_name.clone()))
            .or_default();
        entry.cost += cost.cost;
    }

    for touch in touches {
        let entry = totals
            .entry((touch.date, touch.channel_name.clone()))
            .or_default();
        entry.ihc += touch.ihc_weight;
        entry.ihc_revenue += touch.ihc_weight * touch.revenue;
    }

    totals
        .into_iter()
        .map(|((date, channel_name), t)| {
            ChannelReportRow::from_totals(channel_name, date, t.cost, t.ihc, t.ihc_revenue)
        })
        .collect()
}

const CSV_HEADER: &str = "channel_name,date,cost,ihc,ihc_revenue,CPO,ROAS";

/// Escape a CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn optional_metric(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn format_row(row: &ChannelReportRow) -> String {
    [
        escape_field(&row.channel_name),
        row.date.format("%Y-%m-%d").to_string(),
        row.cost.to_string(),
        row.ihc.to_string(),
        row.ihc_revenue.to_string(),
        optional_metric(row.cpo),
        optional_metric(row.roas),
    ]
    .join(",")
}

/// Render report rows as CSV text, header first.
pub fn to_csv(rows: &[ChannelReportRow]) -> String {
    let mut output = String::from(CSV_HEADER);
    output.push('\n');
    for row in rows {
        output.push_str(&format_row(row));
        output.push('\n');
    }
    output
}

/// Write the report CSV, creating parent directories as needed.
pub fn write_csv(rows: &[ChannelReportRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(to_csv(rows).as_bytes())?;
    info!(rows = rows.len(), path = %path.display(), "Exported channel report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn touch(channel: &str, day: &str, weight: f64, revenue: f64) -> AttributedTouch {
        AttributedTouch {
            channel_name: channel.to_string(),
            date: date(day),
            ihc_weight: weight,
            revenue,
        }
    }

    fn session_cost(channel: &str, day: &str, cost: f64) -> SessionCost {
        SessionCost {
            channel_name: channel.to_string(),
            date: date(day),
            cost,
        }
    }

    #[test]
    fn metric_derivation() {
        // Costs {10, 5} on Search 2023-09-01, weights summing to ihc=3 with
        // revenue contribution 150 -> cost=15, CPO=5.0, ROAS=10.0
        let costs = vec![
            session_cost("Search", "2023-09-01", 10.0),
            session_cost("Search", "2023-09-01", 5.0),
        ];
        let touches = vec![
            touch("Search", "2023-09-01", 1.0, 50.0),
            touch("Search", "2023-09-01", 2.0, 50.0),
        ];

        let rows = build_channel_report(&touches, &costs);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!((row.cost - 15.0).abs() < 1e-9);
        assert!((row.ihc - 3.0).abs() < 1e-9);
        assert!((row.ihc_revenue - 150.0).abs() < 1e-9);
        assert_eq!(row.cpo, Some(5.0));
        assert_eq!(row.roas, Some(10.0));
    }

    #[test]
    fn zero_cost_channel_has_undefined_roas() {
        let rows = build_channel_report(&[touch("Organic", "2023-09-01", 5.0, 10.0)], &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].roas, None);
        assert!((rows[0].ihc - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unattributed_channel_keeps_cost_with_undefined_cpo() {
        let rows = build_channel_report(&[], &[session_cost("Display", "2023-09-01", 12.0)]);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].cost - 12.0).abs() < 1e-9);
        assert_eq!(rows[0].cpo, None);
        assert_eq!(rows[0].ihc, 0.0);
    }

    #[test]
    fn rows_sorted_by_date_then_channel() {
        let costs = vec![
            session_cost("Search", "2023-09-02", 1.0),
            session_cost("Email", "2023-09-02", 1.0),
            session_cost("Social", "2023-09-01", 1.0),
        ];
        let rows = build_channel_report(&[], &costs);
        let keys: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.date.to_string(), r.channel_name.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2023-09-01".to_string(), "Social".to_string()),
                ("2023-09-02".to_string(), "Email".to_string()),
                ("2023-09-02".to_string(), "Search".to_string()),
            ]
        );
    }

    #[test]
    fn csv_has_exact_columns_and_blank_undefined_metrics() {
        let rows = build_channel_report(
            &[touch("Search", "2023-09-01", 2.0, 50.0)],
            &[
                session_cost("Search", "2023-09-01", 10.0),
                session_cost("Organic", "2023-09-01", 0.0),
            ],
        );
        let csv = to_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "channel_name,date,cost,ihc,ihc_revenue,CPO,ROAS");
        // Organic: zero cost and zero ihc -> CPO and ROAS both blank
        assert_eq!(lines[1], "Organic,2023-09-01,0,0,0,,");
        assert_eq!(lines[2], "Search,2023-09-01,10,2,100,5,10");
    }

    #[test]
    fn csv_escapes_awkward_channel_names() {
        assert_eq!(escape_field("Paid Search"), "Paid Search");
        assert_eq!(escape_field("Search, Paid"), "\"Search, Paid\"");
        assert_eq!(escape_field("He said \"hi\""), "\"He said \"\"hi\"\"\"");
    }

    #[test]
    fn write_csv_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("channel_report.csv");
        let rows = build_channel_report(&[], &[session_cost("Search", "2023-09-01", 1.0)]);

        write_csv(&rows, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("channel_name,"));
        assert_eq!(written.lines().count(), 2);
    }
}
