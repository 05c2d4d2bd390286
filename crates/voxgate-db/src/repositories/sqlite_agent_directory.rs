//! `SQLite` implementation of the `AgentDirectory` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use voxgate_core::domain::{AgentProfile, DispositionTaxonomy};
use voxgate_core::ports::agents::{last_ten_digits, AgentDirectory, AgentDirectoryError};

/// `SQLite` implementation of the agent directory.
pub struct SqliteAgentDirectory {
    pool: SqlitePool,
}

impl SqliteAgentDirectory {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn all_agents(&self) -> Result<Vec<AgentProfile>, AgentDirectoryError> {
        let rows = sqlx::query(
            "SELECT id, client_id, name, calling_number, system_prompt, first_message,
                    voice_id, language, asr_model, llm_model, messaging_enabled,
                    messaging_url, messaging_link, dispositions
             FROM agents",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgentDirectoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(map_agent_row).collect())
    }
}

fn map_agent_row(row: &sqlx::sqlite::SqliteRow) -> AgentProfile {
    let dispositions: Vec<DispositionTaxonomy> = row
        .get::<Option<String>, _>("dispositions")
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    AgentProfile {
        id: row.get("id"),
        client_id: row.get("client_id"),
        name: row.get("name"),
        calling_number: row.get("calling_number"),
        system_prompt: row.get("system_prompt"),
        first_message: row.get("first_message"),
        voice_id: row.get("voice_id"),
        language: row.get("language"),
        asr_model: row.get("asr_model"),
        llm_model: row.get("llm_model"),
        messaging_enabled: row.get::<i64, _>("messaging_enabled") != 0,
        messaging_url: row.get("messaging_url"),
        messaging_link: row.get("messaging_link"),
        dispositions,
    }
}

#[async_trait]
impl AgentDirectory for SqliteAgentDirectory {
    async fn resolve(
        &self,
        dialed: &str,
        caller: &str,
    ) -> Result<Option<AgentProfile>, AgentDirectoryError> {
        let agents = self.all_agents().await?;

        // Priority 1: the agent's number is the dialed number.
        if let Some(agent) = agents.iter().find(|a| a.calling_number == dialed) {
            return Ok(Some(agent.clone()));
        }
        // Priority 2: the agent's number is the caller (outbound legs).
        if let Some(agent) = agents.iter().find(|a| a.calling_number == caller) {
            return Ok(Some(agent.clone()));
        }
        // Priority 3: last-10-digit match against either side, tolerating
        // country-prefix variants.
        let dialed_tail = last_ten_digits(dialed);
        let caller_tail = last_ten_digits(caller);
        let agent = agents.iter().find(|a| {
            let tail = last_ten_digits(&a.calling_number);
            !tail.is_empty() && (tail == dialed_tail || tail == caller_tail)
        });

        Ok(agent.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_database;

    async fn seed_agent(pool: &SqlitePool, id: i64, number: &str) {
        sqlx::query("INSERT OR IGNORE INTO clients (id, credit_balance) VALUES (1, 10)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO agents (id, client_id, name, calling_number, system_prompt,
                                 first_message, voice_id)
             VALUES (?, 1, 'agent', ?, 'prompt', 'Hello!', 'voice')",
        )
        .bind(id)
        .bind(number)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn resolves_by_dialed_number_first() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_database(&dir.path().join("t.db")).await.unwrap();
        seed_agent(&pool, 1, "911409000000").await;
        seed_agent(&pool, 2, "919876543210").await;

        let directory = SqliteAgentDirectory::new(pool);
        let agent = directory
            .resolve("911409000000", "919876543210")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.id, 1);
    }

    #[tokio::test]
    async fn resolves_by_last_ten_digits() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_database(&dir.path().join("t.db")).await.unwrap();
        seed_agent(&pool, 1, "1409000000").await; // stored without prefix

        let directory = SqliteAgentDirectory::new(pool);
        let agent = directory
            .resolve("+911409000000", "anything")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.id, 1);
    }

    #[tokio::test]
    async fn no_match_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_database(&dir.path().join("t.db")).await.unwrap();
        seed_agent(&pool, 1, "911409000000").await;

        let directory = SqliteAgentDirectory::new(pool);
        let agent = directory.resolve("910000000000", "910000000001").await.unwrap();
        assert!(agent.is_none());
    }
}
