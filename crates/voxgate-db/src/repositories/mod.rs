//! Repository implementations.

pub mod sqlite_agent_directory;
pub mod sqlite_billing_ledger;
pub mod sqlite_call_log_repository;

pub use sqlite_agent_directory::SqliteAgentDirectory;
pub use sqlite_billing_ledger::SqliteBillingLedger;
pub use sqlite_call_log_repository::SqliteCallLogRepository;
