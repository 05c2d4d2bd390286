//! Agent directory port definition.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::AgentProfile;

/// Errors that can occur during agent resolution.
#[derive(Debug, Error)]
pub enum AgentDirectoryError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Port for resolving which agent should handle a call.
///
/// Resolution priority, matching how the PBX routes numbers:
/// 1. agent calling number equals the dialed number,
/// 2. agent calling number equals the caller number,
/// 3. last-10-digit match of the agent calling number against either.
///
/// Returns `None` when no agent matches — the session terminates the call
/// with an error event in that case.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn resolve(
        &self,
        dialed: &str,
        caller: &str,
    ) -> Result<Option<AgentProfile>, AgentDirectoryError>;
}

/// The trailing ten digits of a phone number, used for loose matching
/// across country-prefix variants.
#[must_use]
pub fn last_ten_digits(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}
