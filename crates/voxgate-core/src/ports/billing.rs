//! Credit ledger port definition.
//!
//! Connected audio is charged at 1/30 credit per second; a successfully
//! dispatched follow-up message costs 1 credit.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Credits charged per second of connected audio.
pub const CREDITS_PER_SECOND: f64 = 1.0 / 30.0;

/// Credits charged per dispatched follow-up message.
pub const MESSAGING_CREDITS: f64 = 1.0;

/// Errors that can occur in billing operations.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Client not found: {0}")]
    ClientNotFound(i64),

    #[error("Insufficient credits: balance {balance}")]
    InsufficientCredits { balance: f64 },

    #[error("Database error: {0}")]
    Database(String),
}

/// Result of charging a call.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCharge {
    pub credits_used: f64,
    pub balance_after: f64,
}

/// Context attached to a call charge for auditability.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallChargeMeta {
    pub mobile: String,
    pub direction: String,
    pub call_log_id: Option<i64>,
    pub stream_id: String,
    pub uniqueid: Option<String>,
}

/// Port for credit balance operations.
#[async_trait]
pub trait BillingLedger: Send + Sync {
    /// Fetch the client's balance, creating a zero-balance account if the
    /// client has none yet.
    async fn get_or_create(&self, client_id: i64) -> Result<f64, BillingError>;

    /// Charge for `seconds` of connected audio at [`CREDITS_PER_SECOND`].
    async fn bill_call(
        &self,
        client_id: i64,
        seconds: u64,
        meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError>;

    /// Deduct an ad-hoc amount (e.g. [`MESSAGING_CREDITS`]) with a reason
    /// string recorded in the ledger.
    async fn use_credits(
        &self,
        client_id: i64,
        amount: f64,
        reason: &str,
        meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError>;
}

/// Credits owed for a call of the given duration.
#[must_use]
pub fn call_credits(seconds: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        seconds as f64 * CREDITS_PER_SECOND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_seconds_costs_one_credit() {
        assert!((call_credits(30) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_costs_nothing() {
        assert!(call_credits(0).abs() < f64::EPSILON);
    }

    #[test]
    fn fractional_credits_are_kept() {
        // 45 seconds = 1.5 credits, not rounded to an integer.
        assert!((call_credits(45) - 1.5).abs() < 1e-9);
    }
}
