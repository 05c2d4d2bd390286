//! Live call-record writer with batched saves.
//!
//! Mid-call updates are snapshots, so only the newest one needs to reach
//! the database: a write is issued once five updates have accumulated or
//! three seconds have passed since the first unsaved one. `finalize` is
//! guarded so the record is written exactly once no matter how many
//! teardown paths fire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use voxgate_core::ports::{CallLogError, CallLogFinal, CallLogLive, CallLogRepository};

/// Unsaved updates that force a flush.
const BATCH_SIZE: usize = 5;

/// Age of the oldest unsaved update that forces a flush.
const DEBOUNCE: Duration = Duration::from_secs(3);

/// Batched writer for one call's record.
pub struct CallLogger {
    repo: Arc<dyn CallLogRepository>,
    record_id: i64,
    latest: Option<CallLogLive>,
    unsaved: usize,
    first_unsaved_at: Option<Instant>,
    finalized: bool,
}

impl CallLogger {
    #[must_use]
    pub fn new(repo: Arc<dyn CallLogRepository>, record_id: i64) -> Self {
        Self {
            repo,
            record_id,
            latest: None,
            unsaved: 0,
            first_unsaved_at: None,
            finalized: false,
        }
    }

    #[must_use]
    pub const fn record_id(&self) -> i64 {
        self.record_id
    }

    /// Queue a live snapshot, flushing when the batch or debounce
    /// threshold is reached.
    pub async fn live(&mut self, update: CallLogLive) {
        if self.finalized {
            return;
        }

        self.latest = Some(update);
        self.unsaved += 1;
        let first = *self.first_unsaved_at.get_or_insert_with(Instant::now);

        if self.unsaved >= BATCH_SIZE || first.elapsed() >= DEBOUNCE {
            self.flush().await;
        }
    }

    /// Write the newest queued snapshot, if any.
    pub async fn flush(&mut self) {
        let Some(update) = self.latest.take() else {
            return;
        };
        self.unsaved = 0;
        self.first_unsaved_at = None;

        if let Err(e) = self.repo.update_live(self.record_id, update).await {
            // Live saves are best-effort; the finalize at teardown is the
            // record of truth.
            tracing::warn!(record_id = self.record_id, error = %e, "Live call-log save failed");
        }
    }

    /// Finalize the record. Returns `false` when already finalized —
    /// teardown is idempotent and both `stop` and socket-close call this.
    pub async fn finalize(&mut self, record: CallLogFinal) -> Result<bool, CallLogError> {
        if self.finalized {
            return Ok(false);
        }
        self.finalized = true;
        self.latest = None;

        self.repo.finalize(self.record_id, record).await?;
        Ok(true)
    }
}
