//! Call log repository port definition.
//!
//! A record is created when the call starts, updated live during the call
//! (the caller batches updates), and finalized exactly once at teardown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::LeadStatus;

/// Errors that can occur in call log operations.
#[derive(Debug, Error)]
pub enum CallLogError {
    #[error("Call log not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(String),
}

/// Payload for the initial record created on `start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogSeed {
    pub client_id: i64,
    pub agent_id: i64,
    pub mobile: String,
    pub direction: String,
    pub started_at: DateTime<Utc>,
    pub stream_id: String,
    pub call_id: String,
    pub metadata: serde_json::Value,
}

/// Payload for a live (mid-call) update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogLive {
    pub transcript: String,
    pub duration_seconds: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub last_updated: DateTime<Utc>,
    pub messaging_requested: bool,
}

/// Payload for the one-and-only finalize at teardown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogFinal {
    pub lead_status: LeadStatus,
    pub disposition: Option<String>,
    pub sub_disposition: Option<String>,
    pub duration_seconds: u64,
    pub transcript: String,
    pub messaging_sent: bool,
    pub metadata: serde_json::Value,
}

/// Port for call record persistence.
#[async_trait]
pub trait CallLogRepository: Send + Sync {
    /// Create the initial record; returns its id.
    async fn create_initial(&self, seed: CallLogSeed) -> Result<i64, CallLogError>;

    /// Apply a live update to an existing record.
    async fn update_live(&self, id: i64, update: CallLogLive) -> Result<(), CallLogError>;

    /// Finalize the record. Implementations overwrite any live state.
    async fn finalize(&self, id: i64, record: CallLogFinal) -> Result<(), CallLogError>;
}
