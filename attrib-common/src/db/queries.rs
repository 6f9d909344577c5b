//! Store queries for the attribution pipeline
//!
//! Reads return typed records (see [`crate::db::models`]); writes are
//! transactional per call, so a failure mid-batch leaves the store in its
//! pre-call state.

use crate::db::models::{
    format_event_time, parse_event_time, AttributedTouch, AttributionResult, ChannelReportRow,
    Conversion, Session, SessionCost,
};
use crate::{Error, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

/// SQLite's default bound-variable limit is 999; stay well under it when
/// expanding `IN` lists.
const IN_CHUNK: usize = 500;

fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn check_non_negative(what: &str, id: &str, value: f64) -> Result<f64> {
    if value < 0.0 || !value.is_finite() {
        return Err(Error::InvalidRecord(format!(
            "{} {} has invalid amount {}",
            what, id, value
        )));
    }
    Ok(value)
}

/// Fetch conversions whose event date falls in `[start, end]`, ordered by
/// `(event_time, conversion_id)` ascending.
///
/// An empty result is not an error.
pub async fn fetch_conversions(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Conversion>> {
    let rows = sqlx::query(
        r#"
        SELECT conversion_id, user_id, event_time, revenue
        FROM conversions
        WHERE date(event_time) >= ? AND date(event_time) <= ?
        ORDER BY event_time, conversion_id
        "#,
    )
    .bind(date_param(start))
    .bind(date_param(end))
    .fetch_all(pool)
    .await?;

    let mut conversions = Vec::with_capacity(rows.len());
    for row in rows {
        let conversion_id: String = row.get("conversion_id");
        let raw_time: String = row.get("event_time");
        let revenue: f64 = row.get("revenue");
        conversions.push(Conversion {
            event_time: parse_event_time(&raw_time)?,
            revenue: check_non_negative("conversion", &conversion_id, revenue)?,
            user_id: row.get("user_id"),
            conversion_id,
        });
    }

    debug!(count = conversions.len(), "Fetched conversions");
    Ok(conversions)
}

/// Fetch all sessions belonging to the given users, regardless of date
/// (journeys may reach back before the run window).
pub async fn fetch_sessions_for_users(
    pool: &SqlitePool,
    user_ids: &[String],
) -> Result<Vec<Session>> {
    let mut sessions = Vec::new();

    for chunk in user_ids.chunks(IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT session_id, user_id, channel_name, event_time, cost \
             FROM sessions WHERE user_id IN ({}) \
             ORDER BY user_id, event_time, session_id",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for user_id in chunk {
            query = query.bind(user_id);
        }

        for row in query.fetch_all(pool).await? {
            let session_id: String = row.get("session_id");
            let raw_time: String = row.get("event_time");
            let cost: f64 = row.get("cost");
            sessions.push(Session {
                event_time: parse_event_time(&raw_time)?,
                cost: check_non_negative("session", &session_id, cost)?,
                user_id: row.get("user_id"),
                channel_name: row.get("channel_name"),
                session_id,
            });
        }
    }

    debug!(
        users = user_ids.len(),
        count = sessions.len(),
        "Fetched sessions"
    );
    Ok(sessions)
}

/// Insert attribution results, ignoring pairs that are already stored.
///
/// One transaction per call; returns the number of rows actually inserted.
/// Duplicate `(session_id, conversion_id)` pairs are a no-op, not an error.
pub async fn insert_attribution_results(
    pool: &SqlitePool,
    results: &[AttributionResult],
) -> Result<u64> {
    if results.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for result in results {
        let outcome = sqlx::query(
            r#"
            INSERT INTO attribution_results (session_id, conversion_id, ihc_weight)
            VALUES (?, ?, ?)
            ON CONFLICT (session_id, conversion_id) DO NOTHING
            "#,
        )
        .bind(&result.session_id)
        .bind(&result.conversion_id)
        .bind(result.ihc_weight)
        .execute(&mut *tx)
        .await?;
        inserted += outcome.rows_affected();
    }

    tx.commit().await?;
    debug!(
        submitted = results.len(),
        inserted, "Persisted attribution results"
    );
    Ok(inserted)
}

/// Which of the given conversions already have stored attribution weights.
///
/// Used to skip remote scoring for conversions handled by a previous run.
pub async fn conversions_already_attributed(
    pool: &SqlitePool,
    conversion_ids: &[String],
) -> Result<HashSet<String>> {
    let mut attributed = HashSet::new();

    for chunk in conversion_ids.chunks(IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT DISTINCT conversion_id FROM attribution_results WHERE conversion_id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for conversion_id in chunk {
            query = query.bind(conversion_id);
        }

        for row in query.fetch_all(pool).await? {
            attributed.insert(row.get::<String, _>("conversion_id"));
        }
    }

    Ok(attributed)
}

/// Conversions whose stored weights do not sum to 1.0 (± 0.001).
///
/// Returned for data-quality logging; a non-empty result does not stop the
/// run, since a partial update may legitimately be in flight.
pub async fn attribution_sum_outliers(pool: &SqlitePool) -> Result<Vec<(String, f64)>> {
    let rows = sqlx::query(
        r#"
        SELECT conversion_id, SUM(ihc_weight) AS total
        FROM attribution_results
        GROUP BY conversion_id
        HAVING ABS(total - 1.0) > 0.001
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("conversion_id"), row.get("total")))
        .collect())
}

/// Stored attribution weights joined with session channel/date and
/// conversion revenue, restricted to sessions dated in `[start, end]`.
pub async fn fetch_attributed_touches(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AttributedTouch>> {
    let rows = sqlx::query(
        r#"
        SELECT s.channel_name AS channel_name,
               date(s.event_time) AS date,
               ar.ihc_weight AS ihc_weight,
               c.revenue AS revenue
        FROM attribution_results ar
        JOIN sessions s ON s.session_id = ar.session_id
        JOIN conversions c ON c.conversion_id = ar.conversion_id
        WHERE date(s.event_time) >= ? AND date(s.event_time) <= ?
        "#,
    )
    .bind(date_param(start))
    .bind(date_param(end))
    .fetch_all(pool)
    .await?;

    let mut touches = Vec::with_capacity(rows.len());
    for row in rows {
        let raw_date: String = row.get("date");
        let date = raw_date
            .parse::<NaiveDate>()
            .map_err(|e| Error::InvalidRecord(format!("Bad date {:?}: {}", raw_date, e)))?;
        touches.push(AttributedTouch {
            channel_name: row.get("channel_name"),
            date,
            ihc_weight: row.get("ihc_weight"),
            revenue: row.get("revenue"),
        });
    }
    Ok(touches)
}

/// Cost of every session dated in `[start, end]`, keyed by channel and date.
///
/// Cost is a channel/date property: it covers all sessions in range, not
/// just those that received attribution.
pub async fn fetch_session_costs(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<SessionCost>> {
    let rows = sqlx::query(
        r#"
        SELECT channel_name, date(event_time) AS date, cost
        FROM sessions
        WHERE date(event_time) >= ? AND date(event_time) <= ?
        "#,
    )
    .bind(date_param(start))
    .bind(date_param(end))
    .fetch_all(pool)
    .await?;

    let mut costs = Vec::with_capacity(rows.len());
    for row in rows {
        let raw_date: String = row.get("date");
        let date = raw_date
            .parse::<NaiveDate>()
            .map_err(|e| Error::InvalidRecord(format!("Bad date {:?}: {}", raw_date, e)))?;
        costs.push(SessionCost {
            channel_name: row.get("channel_name"),
            date,
            cost: row.get("cost"),
        });
    }
    Ok(costs)
}

/// Replace the channel report rows for dates in `[start, end]`.
///
/// Delete-then-insert runs in one transaction so a failure leaves the prior
/// report intact. Rows for dates outside the window are untouched.
pub async fn replace_channel_report(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    rows: &[ChannelReportRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM channel_report WHERE date >= ? AND date <= ?")
        .bind(date_param(start))
        .bind(date_param(end))
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO channel_report
                (channel_name, date, cost, ihc, ihc_revenue, cpo, roas)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.channel_name)
        .bind(date_param(row.date))
        .bind(row.cost)
        .bind(row.ihc)
        .bind(row.ihc_revenue)
        .bind(row.cpo)
        .bind(row.roas)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(rows = rows.len(), "Replaced channel report for window");
    Ok(())
}

/// Test/seed helper: insert a session row with a preformatted timestamp.
pub async fn insert_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    sqlx::query(
        "INSERT INTO sessions (session_id, user_id, channel_name, event_time, cost) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session.session_id)
    .bind(&session.user_id)
    .bind(&session.channel_name)
    .bind(format_event_time(&session.event_time))
    .bind(session.cost)
    .execute(pool)
    .await?;
    Ok(())
}

/// Test/seed helper: insert a conversion row.
pub async fn insert_conversion(pool: &SqlitePool, conversion: &Conversion) -> Result<()> {
    sqlx::query(
        "INSERT INTO conversions (conversion_id, user_id, event_time, revenue) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&conversion.conversion_id)
    .bind(&conversion.user_id)
    .bind(format_event_time(&conversion.event_time))
    .bind(conversion.revenue)
    .execute(pool)
    .await?;
    Ok(())
}
