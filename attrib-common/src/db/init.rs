//! Database initialization
//!
//! Opens (creating if needed) the SQLite store and ensures the schema
//! exists. Table creation is idempotent, so startup is safe against an
//! already-populated database.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Set busy timeout
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    // Schema creation (idempotent - safe to call multiple times)
    create_sessions_table(&pool).await?;
    create_conversions_table(&pool).await?;
    create_attribution_results_table(&pool).await?;
    create_channel_report_table(&pool).await?;

    Ok(pool)
}

/// Raw touchpoint records; externally owned, read-only for the pipeline
async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id   TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            channel_name TEXT NOT NULL,
            event_time   TEXT NOT NULL,
            cost         REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user_time ON sessions (user_id, event_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Outcome records; externally owned, read-only for the pipeline
async fn create_conversions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversions (
            conversion_id TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            event_time    TEXT NOT NULL,
            revenue       REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversions_time ON conversions (event_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-touchpoint credit weights; append-only, composite key makes
/// re-insertion a no-op
async fn create_attribution_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attribution_results (
            session_id    TEXT NOT NULL,
            conversion_id TEXT NOT NULL,
            ihc_weight    REAL NOT NULL,
            PRIMARY KEY (session_id, conversion_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Derived per-channel, per-date report; recomputed per run window
async fn create_channel_report_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channel_report (
            channel_name TEXT NOT NULL,
            date         TEXT NOT NULL,
            cost         REAL NOT NULL,
            ihc          REAL NOT NULL,
            ihc_revenue  REAL NOT NULL,
            cpo          REAL,
            roas         REAL,
            PRIMARY KEY (channel_name, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
