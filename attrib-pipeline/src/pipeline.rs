//! Pipeline orchestration
//!
//! Staged run over immutable inputs:
//! extract -> build journeys -> submit -> persist -> aggregate -> export.
//! Per-conversion problems are isolated and tallied in the run summary;
//! only storage failures abort the run.

use crate::journey::build_journeys;
use crate::report::{build_channel_report, write_csv};
use crate::scoring::{ScoringClient, ScoringConfig};
use attrib_common::db::{
    attribution_sum_outliers, conversions_already_attributed, fetch_attributed_touches,
    fetch_conversions, fetch_session_costs, fetch_sessions_for_users, init_database,
    insert_attribution_results, replace_channel_report,
};
use attrib_common::Result;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one pipeline run needs, passed explicitly
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    /// First day of the run window (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the run window (inclusive)
    pub end_date: NaiveDate,
    /// CSV export destination
    pub output_path: PathBuf,
    pub scoring: ScoringConfig,
}

/// Per-outcome tallies for one pipeline run
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Conversions found in the run window
    pub conversions: usize,
    /// Conversions that received at least one weight this run
    pub attributed: usize,
    /// Conversions with no eligible sessions
    pub skipped_no_sessions: usize,
    /// Conversions already scored by a previous run
    pub already_attributed: usize,
    /// Conversions whose chunk exhausted its retries
    pub failed_remote: usize,
    /// Conversions rejected by the scoring service
    pub failed_validation: usize,
    /// Attribution rows newly persisted
    pub results_inserted: u64,
    /// Report rows written for the window
    pub report_rows: usize,
}

/// Run the attribution pipeline over the configured window.
///
/// Returns `Err` only for fatal storage/adapter failures; partial remote
/// failures are reflected in the summary instead.
pub async fn run(config: &PipelineConfig) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        start = %config.start_date,
        end = %config.end_date,
        "Starting attribution pipeline run"
    );

    let pool = init_database(&config.db_path).await?;

    // Extract
    let conversions = fetch_conversions(&pool, config.start_date, config.end_date).await?;
    if conversions.is_empty() {
        warn!("No conversions found in the run window");
    }

    let mut user_ids: Vec<String> = conversions.iter().map(|c| c.user_id.clone()).collect();
    user_ids.sort();
    user_ids.dedup();
    let sessions = fetch_sessions_for_users(&pool, &user_ids).await?;

    // Build journeys
    let build = build_journeys(&conversions, &sessions);
    for conversion_id in &build.empty_conversions {
        warn!(%conversion_id, "Conversion has no eligible sessions; skipping");
    }

    // Skip conversions a previous run already scored
    let journey_ids: Vec<String> = build
        .journeys
        .iter()
        .map(|j| j.conversion_id.clone())
        .collect();
    let already = conversions_already_attributed(&pool, &journey_ids).await?;
    if !already.is_empty() {
        info!(
            count = already.len(),
            "Skipping conversions with stored attribution"
        );
    }
    let journeys: Vec<_> = build
        .journeys
        .into_iter()
        .filter(|j| !already.contains(&j.conversion_id))
        .collect();

    // Submit and persist
    let mut summary = RunSummary {
        run_id,
        conversions: conversions.len(),
        attributed: 0,
        skipped_no_sessions: build.empty_conversions.len(),
        already_attributed: already.len(),
        failed_remote: 0,
        failed_validation: 0,
        results_inserted: 0,
        report_rows: 0,
    };

    if !journeys.is_empty() {
        let client = ScoringClient::new(config.scoring.clone())?;
        let submission = client.submit(journeys).await;

        let attributed: HashSet<&str> = submission
            .results
            .iter()
            .map(|r| r.conversion_id.as_str())
            .collect();
        summary.attributed = attributed.len();
        summary.failed_remote = submission.failed_remote.len();
        summary.failed_validation = submission.failed_validation.len();

        summary.results_inserted =
            insert_attribution_results(&pool, &submission.results).await?;
    } else {
        info!("Nothing to submit");
    }

    for (conversion_id, total) in attribution_sum_outliers(&pool).await? {
        warn!(
            %conversion_id,
            total,
            "Stored attribution weights do not sum to 1.0"
        );
    }

    // Aggregate and export
    let touches = fetch_attributed_touches(&pool, config.start_date, config.end_date).await?;
    let costs = fetch_session_costs(&pool, config.start_date, config.end_date).await?;
    let rows = build_channel_report(&touches, &costs);
    summary.report_rows = rows.len();

    replace_channel_report(&pool, config.start_date, config.end_date, &rows).await?;
    write_csv(&rows, &config.output_path)?;

    info!(
        %run_id,
        conversions = summary.conversions,
        attributed = summary.attributed,
        skipped_no_sessions = summary.skipped_no_sessions,
        already_attributed = summary.already_attributed,
        failed_remote = summary.failed_remote,
        failed_validation = summary.failed_validation,
        results_inserted = summary.results_inserted,
        report_rows = summary.report_rows,
        "Pipeline run complete"
    );

    Ok(summary)
}
