//! `SQLite` implementation of the `CallLogRepository` trait.

use async_trait::async_trait;
use sqlx::SqlitePool;

use voxgate_core::ports::{CallLogError, CallLogFinal, CallLogLive, CallLogRepository, CallLogSeed};

/// `SQLite` implementation of the call record store.
pub struct SqliteCallLogRepository {
    pool: SqlitePool,
}

impl SqliteCallLogRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallLogRepository for SqliteCallLogRepository {
    async fn create_initial(&self, seed: CallLogSeed) -> Result<i64, CallLogError> {
        let metadata = seed.metadata.to_string();
        let result = sqlx::query(
            "INSERT INTO call_logs
                (client_id, agent_id, mobile, direction, started_at, stream_id, call_id, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(seed.client_id)
        .bind(seed.agent_id)
        .bind(&seed.mobile)
        .bind(&seed.direction)
        .bind(seed.started_at.to_rfc3339())
        .bind(&seed.stream_id)
        .bind(&seed.call_id)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| CallLogError::Database(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn update_live(&self, id: i64, update: CallLogLive) -> Result<(), CallLogError> {
        let result = sqlx::query(
            "UPDATE call_logs
             SET transcript = ?, duration_seconds = ?, frames_in = ?, frames_out = ?,
                 messaging_requested = ?, last_updated = ?
             WHERE id = ? AND finalized = 0",
        )
        .bind(&update.transcript)
        .bind(update.duration_seconds as i64)
        .bind(update.frames_in as i64)
        .bind(update.frames_out as i64)
        .bind(i64::from(update.messaging_requested))
        .bind(update.last_updated.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CallLogError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CallLogError::NotFound(id));
        }
        Ok(())
    }

    async fn finalize(&self, id: i64, record: CallLogFinal) -> Result<(), CallLogError> {
        let metadata = record.metadata.to_string();
        let result = sqlx::query(
            "UPDATE call_logs
             SET lead_status = ?, disposition = ?, sub_disposition = ?, duration_seconds = ?,
                 transcript = ?, messaging_sent = ?, metadata = ?, finalized = 1,
                 last_updated = datetime('now')
             WHERE id = ?",
        )
        .bind(record.lead_status.as_str())
        .bind(&record.disposition)
        .bind(&record.sub_disposition)
        .bind(record.duration_seconds as i64)
        .bind(&record.transcript)
        .bind(i64::from(record.messaging_sent))
        .bind(metadata)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CallLogError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CallLogError::NotFound(id));
        }
        Ok(())
    }
}
