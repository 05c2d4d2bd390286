//! Gateway settings, loaded once by the binary from the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default port the gateway listens on for PBX connections.
pub const DEFAULT_GATEWAY_PORT: u16 = 8090;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

/// Vendor endpoints and credentials for one gateway process.
///
/// Loaded from the environment at startup and shared as an `Arc`; the
/// pipeline never mutates settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Port for the PBX WebSocket and ops endpoints.
    pub port: u16,

    /// Streaming ASR WebSocket base URL (e.g. `wss://api.deepgram.com/v1/listen`).
    pub asr_url: String,
    pub asr_api_key: String,

    /// LLM chat-completions endpoint URL.
    pub llm_url: String,
    pub llm_api_key: String,

    /// Batch TTS endpoint URL.
    pub tts_url: String,
    pub tts_api_key: String,

    /// SQLite database path.
    pub db_path: std::path::PathBuf,

    /// Send μ-law frames to/from the PBX instead of PCM-16 (SIP profile).
    pub mulaw_profile: bool,
}

impl GatewaySettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        fn required(var: &'static str) -> Result<String, SettingsError> {
            std::env::var(var).map_err(|_| SettingsError::MissingVar(var))
        }

        let port = match std::env::var("VOXGATE_PORT") {
            Ok(raw) => raw.parse().map_err(|_| SettingsError::InvalidVar {
                var: "VOXGATE_PORT",
                value: raw,
            })?,
            Err(_) => DEFAULT_GATEWAY_PORT,
        };

        Ok(Self {
            port,
            asr_url: std::env::var("VOXGATE_ASR_URL")
                .unwrap_or_else(|_| "wss://api.deepgram.com/v1/listen".to_string()),
            asr_api_key: required("VOXGATE_ASR_API_KEY")?,
            llm_url: std::env::var("VOXGATE_LLM_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            llm_api_key: required("VOXGATE_LLM_API_KEY")?,
            tts_url: required("VOXGATE_TTS_URL")?,
            tts_api_key: required("VOXGATE_TTS_API_KEY")?,
            db_path: std::env::var("VOXGATE_DB_PATH")
                .unwrap_or_else(|_| "voxgate.db".to_string())
                .into(),
            mulaw_profile: std::env::var("VOXGATE_MULAW_PROFILE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
