//! Database initialization
//!
//! Opens (or creates) the SQLite document store backing the `records` table.
//! The pool size is supplied by the caller and must be at least the batch
//! concurrency so every pipeline slot can persist status without starving.

use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if max_connections == 0 {
        return Err(Error::Config("Database pool size must be at least 1".to_string()));
    }

    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        // WAL allows readers (the record cursor) alongside the status writers
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent - safe to call multiple times
    create_records_table(&pool).await?;

    Ok(pool)
}

/// Create the `records` table
///
/// `payload` is declared without a type affinity on purpose: BLOB and TEXT
/// values are stored as-is and the store adapter dispatches on the storage
/// class it reads back.
pub async fn create_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY NOT NULL,
            content_hash TEXT,
            payload,
            document TEXT NOT NULL DEFAULT '{}',
            status TEXT CHECK (status IS NULL OR status IN ('processing', 'completed', 'failed')),
            status_updated_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            output_path TEXT,
            duration_seconds REAL,
            loudness TEXT,
            tags TEXT,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON records(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_content_hash ON records(content_hash)")
        .execute(pool)
        .await?;

    Ok(())
}
