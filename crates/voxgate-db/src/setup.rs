//! Database setup and initialization.

use anyhow::Result;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::Path;

/// Open (creating if necessary) the `SQLite` database and ensure the
/// schema exists.
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;

    tracing::info!(path = %db_path.display(), "Database ready");
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY,
            credit_balance REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS credit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER NOT NULL REFERENCES clients(id),
            amount REAL NOT NULL,
            reason TEXT NOT NULL,
            meta TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS agents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER NOT NULL REFERENCES clients(id),
            name TEXT NOT NULL,
            calling_number TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            first_message TEXT NOT NULL,
            voice_id TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en-IN',
            asr_model TEXT NOT NULL DEFAULT 'nova-2',
            llm_model TEXT NOT NULL DEFAULT 'gpt-4o-mini',
            messaging_enabled INTEGER NOT NULL DEFAULT 0,
            messaging_url TEXT,
            messaging_link TEXT,
            dispositions TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agents_calling_number
         ON agents(calling_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS call_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER NOT NULL,
            agent_id INTEGER NOT NULL,
            mobile TEXT NOT NULL,
            direction TEXT NOT NULL,
            started_at TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            call_id TEXT NOT NULL,
            metadata TEXT,
            transcript TEXT NOT NULL DEFAULT '',
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            frames_in INTEGER NOT NULL DEFAULT 0,
            frames_out INTEGER NOT NULL DEFAULT 0,
            messaging_requested INTEGER NOT NULL DEFAULT 0,
            messaging_sent INTEGER NOT NULL DEFAULT 0,
            lead_status TEXT,
            disposition TEXT,
            sub_disposition TEXT,
            finalized INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_logs_stream_id
         ON call_logs(stream_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
