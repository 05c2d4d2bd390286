//! `SQLite` implementation of the `BillingLedger` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use voxgate_core::ports::billing::{
    call_credits, BillingError, BillingLedger, CallCharge, CallChargeMeta,
};

/// `SQLite` implementation of the credit ledger.
pub struct SqliteBillingLedger {
    pool: SqlitePool,
}

impl SqliteBillingLedger {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn charge(
        &self,
        client_id: i64,
        amount: f64,
        reason: &str,
        meta: &CallChargeMeta,
    ) -> Result<CallCharge, BillingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        sqlx::query("UPDATE clients SET credit_balance = credit_balance - ? WHERE id = ?")
            .bind(amount)
            .bind(client_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let meta_json =
            serde_json::to_string(meta).map_err(|e| BillingError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO credit_entries (client_id, amount, reason, meta) VALUES (?, ?, ?, ?)",
        )
        .bind(client_id)
        .bind(-amount)
        .bind(reason)
        .bind(meta_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT credit_balance FROM clients WHERE id = ?")
            .bind(client_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .ok_or(BillingError::ClientNotFound(client_id))?;
        let balance_after: f64 = row.get("credit_balance");

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(CallCharge {
            credits_used: amount,
            balance_after,
        })
    }
}

#[async_trait]
impl BillingLedger for SqliteBillingLedger {
    async fn get_or_create(&self, client_id: i64) -> Result<f64, BillingError> {
        sqlx::query("INSERT OR IGNORE INTO clients (id, credit_balance) VALUES (?, 0)")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT credit_balance FROM clients WHERE id = ?")
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(row.get("credit_balance"))
    }

    async fn bill_call(
        &self,
        client_id: i64,
        seconds: u64,
        meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError> {
        let credits = call_credits(seconds);
        let charge = self.charge(client_id, credits, "call", &meta).await?;
        tracing::info!(
            client_id,
            seconds,
            credits_used = charge.credits_used,
            balance_after = charge.balance_after,
            "Call charged"
        );
        Ok(charge)
    }

    async fn use_credits(
        &self,
        client_id: i64,
        amount: f64,
        reason: &str,
        meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError> {
        self.charge(client_id, amount, reason, &meta).await
    }
}
