//! Port definitions: the traits adapter crates implement.

pub mod agents;
pub mod billing;
pub mod call_log;
pub mod messaging;

pub use agents::{AgentDirectory, AgentDirectoryError};
pub use billing::{BillingError, BillingLedger, CallCharge};
pub use call_log::{CallLogError, CallLogFinal, CallLogLive, CallLogRepository, CallLogSeed};
pub use messaging::{MessagingDispatcher, MessagingError};
