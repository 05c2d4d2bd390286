//! Core domain types and port definitions for the voxgate voice gateway.
//!
//! This crate is infrastructure-free: it defines the call/agent/transcript
//! domain model, the lead-status taxonomy, the gateway settings, and the
//! port traits (agent lookup, billing, call logging, messaging dispatch)
//! that adapter crates implement. Nothing here touches sockets, databases,
//! or audio.

pub mod domain;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    AgentProfile, CallDirection, CallIds, DispositionTaxonomy, LeadStatus, MediaFormat,
    SpeakerRole, Transcript, TranscriptEntry,
};
pub use ports::{
    AgentDirectory, AgentDirectoryError, BillingError, BillingLedger, CallCharge, CallLogError,
    CallLogFinal, CallLogLive, CallLogRepository, CallLogSeed, MessagingDispatcher,
    MessagingError,
};
pub use settings::{GatewaySettings, SettingsError, DEFAULT_GATEWAY_PORT};
