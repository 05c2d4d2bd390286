//! Composition context for the axum adapter.
//!
//! The binary constructs the adapters (database repositories, vendor
//! clients) and hands them to [`GatewayContext`]; each PBX connection
//! then gets its own [`SessionDeps`] with a connection-bound sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use voxgate_core::ports::{AgentDirectory, BillingLedger, CallLogRepository, MessagingDispatcher};
use voxgate_core::GatewaySettings;
use voxgate_voice::{
    AsrConnector, LlmBackend, PbxProfile, PbxSink, SessionDeps, SessionRegistry, TtsBackend,
};

/// Everything a gateway process shares across PBX connections.
pub struct GatewayContext {
    pub settings: Arc<GatewaySettings>,
    pub registry: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,

    pub agents: Arc<dyn AgentDirectory>,
    pub billing: Arc<dyn BillingLedger>,
    pub call_log: Arc<dyn CallLogRepository>,
    pub messaging: Arc<dyn MessagingDispatcher>,

    pub asr: Arc<dyn AsrConnector>,
    pub llm: Arc<dyn LlmBackend>,
    pub tts: Arc<dyn TtsBackend>,

    pub profile: PbxProfile,
}

impl GatewayContext {
    /// Session dependencies for one new PBX connection.
    #[must_use]
    pub fn session_deps(&self, sink: Arc<dyn PbxSink>) -> SessionDeps {
        SessionDeps {
            agents: Arc::clone(&self.agents),
            billing: Arc::clone(&self.billing),
            call_log: Arc::clone(&self.call_log),
            messaging: Arc::clone(&self.messaging),
            asr: Arc::clone(&self.asr),
            llm: Arc::clone(&self.llm),
            tts: Arc::clone(&self.tts),
            sink,
            registry: Arc::clone(&self.registry),
            profile: self.profile,
        }
    }
}
