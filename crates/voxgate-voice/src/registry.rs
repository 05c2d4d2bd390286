//! Process-wide session registry.
//!
//! Tracks active calls by stream id and remembers which streams have been
//! billed, so the `stop` event and the socket-close path cannot double
//! charge. Entries are inserted on `start` and removed at teardown.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Summary of one active call, for the ops endpoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCall {
    pub call_id: String,
    pub agent_id: i64,
    pub started_at: DateTime<Utc>,
}

/// Registry of active sessions and billed streams.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<String, ActiveCall>>,
    billed: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call on `start`.
    pub fn insert(&self, stream_id: &str, call: ActiveCall) {
        let mut active = self.active.lock().unwrap();
        if active.insert(stream_id.to_string(), call).is_some() {
            tracing::warn!(stream_id, "Duplicate stream id registered");
        }
    }

    /// Deregister at teardown.
    pub fn remove(&self, stream_id: &str) {
        self.active.lock().unwrap().remove(stream_id);
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    #[must_use]
    pub fn active_calls(&self) -> Vec<ActiveCall> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    /// Claim billing for a stream. Returns `false` if it was already
    /// billed — the caller must then skip the charge.
    #[must_use]
    pub fn try_mark_billed(&self, stream_id: &str) -> bool {
        self.billed.lock().unwrap().insert(stream_id.to_string())
    }

    /// Forget a billed stream once its teardown fully completes, so the
    /// set does not grow unboundedly.
    pub fn forget_billed(&self, stream_id: &str) {
        self.billed.lock().unwrap().remove(stream_id);
    }
}
