//! `SQLite` repository implementations for voxgate.
//!
//! Implements the persistence ports defined in `voxgate-core`: the agent
//! directory, the credit ledger, and the call-log repository. One
//! [`setup_database`] call creates the schema; all repositories share a
//! single `SqlitePool`.

#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;

pub mod repositories;
pub mod setup;

pub use repositories::{SqliteAgentDirectory, SqliteBillingLedger, SqliteCallLogRepository};
pub use setup::setup_database;
